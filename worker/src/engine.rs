//! Transfer engines run inside the worker.
//!
//! An engine reports what it learns through [`EngineEvent`]s and resolves to
//! the path of the finished file. Timing, throttled progress lines and the
//! connect window are handled by the runner, not the engine.

use dlm_core::TokenBucket;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use url::Url;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Name and size of the content became known.
    Metadata { name: String, total_bytes: u64 },
    /// Cumulative bytes written so far.
    Transferred { downloaded_bytes: u64, peers: u32 },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported content reference: {0}")]
    Unsupported(String),
    #[error("source not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("source is not a regular file: {}", .0.display())]
    NotAFile(PathBuf),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| EngineError::Io { context, source }
    }
}

/// Something that can move one item into `target_dir`.
pub trait TransferEngine: Send {
    fn transfer(
        self,
        target_dir: PathBuf,
        events: mpsc::Sender<EngineEvent>,
    ) -> impl Future<Output = Result<PathBuf, EngineError>> + Send;
}

/// Copies a local file, chunk by chunk, optionally throttled.
#[derive(Debug, Clone)]
pub struct LocalFileEngine {
    source: PathBuf,
    rate_limit: Option<u64>,
}

impl LocalFileEngine {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            rate_limit: None,
        }
    }

    /// Accepts `file://` URLs and bare paths; any other scheme is unsupported.
    pub fn from_content_ref(content_ref: &str) -> Result<Self, EngineError> {
        match Url::parse(content_ref) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Self::new)
                .map_err(|_| EngineError::Unsupported(content_ref.to_string())),
            // A drive letter such as `C:\data\a.bin` parses as a one-letter scheme.
            Ok(url) if url.scheme().len() == 1 => Ok(Self::new(content_ref)),
            Ok(url) => Err(EngineError::Unsupported(format!(
                "{} (scheme '{}')",
                content_ref,
                url.scheme()
            ))),
            Err(_) => Ok(Self::new(content_ref)),
        }
    }

    pub fn with_rate_limit(mut self, bytes_per_sec: Option<u64>) -> Self {
        self.rate_limit = bytes_per_sec;
        self
    }
}

impl TransferEngine for LocalFileEngine {
    async fn transfer(
        self,
        target_dir: PathBuf,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<PathBuf, EngineError> {
        let meta = match tokio::fs::metadata(&self.source).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound(self.source));
            }
            Err(err) => return Err(EngineError::io("failed to inspect source")(err)),
        };
        if !meta.is_file() {
            return Err(EngineError::NotAFile(self.source));
        }
        let name = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::NotAFile(self.source.clone()))?;
        let total_bytes = meta.len();
        let _ = events
            .send(EngineEvent::Metadata {
                name: name.clone(),
                total_bytes,
            })
            .await;

        tokio::fs::create_dir_all(&target_dir)
            .await
            .map_err(EngineError::io("failed to create target directory"))?;
        let dest = target_dir.join(&name);
        let part = target_dir.join(format!("{name}.part"));

        let mut src = tokio::fs::File::open(&self.source)
            .await
            .map_err(EngineError::io("failed to open source"))?;
        let mut dst = tokio::fs::File::create(&part)
            .await
            .map_err(EngineError::io("failed to create partial file"))?;
        let mut bucket = self.rate_limit.map(TokenBucket::per_second);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut downloaded: u64 = 0;

        loop {
            let n = src
                .read(&mut buf)
                .await
                .map_err(EngineError::io("failed to read source"))?;
            if n == 0 {
                break;
            }
            if let Some(bucket) = bucket.as_mut() {
                bucket.acquire(n as u64).await;
            }
            dst.write_all(&buf[..n])
                .await
                .map_err(EngineError::io("failed to write partial file"))?;
            downloaded += n as u64;
            // Counts are cumulative; a dropped update is superseded by the next.
            let _ = events.try_send(EngineEvent::Transferred {
                downloaded_bytes: downloaded,
                peers: 1,
            });
        }
        dst.flush()
            .await
            .map_err(EngineError::io("failed to flush partial file"))?;
        drop(dst);

        tokio::fs::rename(&part, &dest)
            .await
            .map_err(EngineError::io("failed to finalize file"))?;
        tracing::debug!(path = %dest.display(), bytes = downloaded, "transfer complete");
        Ok(dest)
    }
}
