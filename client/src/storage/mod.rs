use dlm_core::StateStore;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Directory holding state slots and worker logs, relative to the data root.
pub const STATE_DIR_NAME: &str = ".state";

/// Manages the on-disk layout of the download data directory.
///
/// Finished files land directly in the root, which is also the target
/// directory handed to every worker. Durable state slots and worker logs live
/// in a hidden `.state` directory beneath it.
#[derive(Debug, Clone)]
pub struct Storage {
    /// Root directory where finished files are stored.
    pub download_dir: PathBuf,
    /// Directory of durable state slots.
    pub state_dir: PathBuf,
}

impl Storage {
    /// Creates a new `Storage` instance.
    ///
    /// If a `path` is provided, it uses that as the download directory.
    /// If `path` is `None`, it defaults to a `downloads` directory in the current working directory.
    ///
    /// Both the download directory and its state directory are created when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if either path exists but is not a directory, or if
    /// creating them fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use client::storage::Storage;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let dir = std::env::temp_dir().join("dlm-doc-storage");
    ///     let storage = Storage::new(Some(dir.clone())).await.unwrap();
    ///     assert!(storage.state_dir.starts_with(&dir));
    /// }
    /// ```
    pub async fn new(path: Option<PathBuf>) -> io::Result<Self> {
        let download_dir = match path {
            Some(p) => p,
            None => std::env::current_dir()?.join("downloads"),
        };
        let state_dir = download_dir.join(STATE_DIR_NAME);

        ensure_dir(&download_dir).await?;
        ensure_dir(&state_dir).await?;

        Ok(Self {
            download_dir,
            state_dir,
        })
    }

    /// The state store backed by this layout's state directory.
    pub fn state_store(&self) -> StateStore {
        StateStore::new(&self.state_dir)
    }
}

async fn ensure_dir(dir: &Path) -> io::Result<()> {
    match fs::metadata(dir).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists but is not a directory", dir.display()),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(dir).await,
        Err(e) => Err(e),
    }
}
