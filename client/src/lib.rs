//! Front-end side of the download orchestrator.
//!
//! [`downloader::DownloadManager`] launches and supervises worker processes;
//! the remaining modules supply its configuration, data layout and the
//! command-line surface of the `dlm` binary.

pub mod cli;
pub mod config;
pub mod downloader;
pub mod storage;
