//! Durable per-record state slots.
//!
//! Each record lives in its own `<id>.json` file. Writes go to a temporary
//! sibling first and are then renamed over the slot, so a reader never sees a
//! half-written record. Unreadable slots are treated as "no information".

use crate::record::StateRecord;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize state record: {source}")]
    Serialize { source: serde_json::Error },
    #[error("failed to write '{}': {source}", path.display())]
    WriteFile { path: PathBuf, source: io::Error },
    #[error("failed to rename '{}' to '{}': {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Directory of state slots shared by the manager and its workers.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slot_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Sidecar file receiving a worker's stderr.
    pub fn log_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.log"))
    }

    pub async fn write(&self, record: &StateRecord) -> Result<()> {
        write_slot(&self.slot_path(&record.id), record).await
    }

    pub async fn load(&self, id: &str) -> Option<StateRecord> {
        read_slot(&self.slot_path(id)).await
    }

    /// Every parseable slot in the directory. A missing directory is empty.
    pub async fn load_all(&self) -> Vec<StateRecord> {
        let mut out = Vec::new();
        let mut rd = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.dir.display(), error = %err, "failed to list state directory");
                }
                return out;
            }
        };
        loop {
            let entry = match rd.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(path = %self.dir.display(), error = %err, "failed to read state directory entry");
                    break;
                }
            };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = read_slot(&path).await {
                out.push(record);
            }
        }
        out
    }

    /// Removes the slot and its log. Failures are ignored.
    pub async fn delete(&self, id: &str) {
        for path in [self.slot_path(id), self.log_path(id)] {
            if let Err(err) = tokio::fs::remove_file(&path).await
                && err.kind() != io::ErrorKind::NotFound
            {
                tracing::debug!(path = %path.display(), error = %err, "failed to remove state file");
            }
        }
    }
}

/// Writes `record` to `path` through a temporary file and a rename.
pub async fn write_slot(path: &Path, record: &StateRecord) -> Result<()> {
    let bytes =
        serde_json::to_vec_pretty(record).map_err(|source| StoreError::Serialize { source })?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|source| StoreError::WriteFile {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Rename {
            from: tmp,
            to: path.to_path_buf(),
            source,
        })?;
    Ok(())
}

/// Reads one slot; a missing or corrupt file yields `None`.
pub async fn read_slot(path: &Path) -> Option<StateRecord> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "skipping unreadable state slot");
            None
        }
    }
}

// The pid keeps the manager and a worker from sharing a temp file.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}
