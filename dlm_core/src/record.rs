//! The durable and in-memory representation of one transfer attempt.

use crate::protocol::WorkerMessage;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Message stored when a worker disappears without reporting a terminal outcome.
pub const UNEXPECTED_EXIT: &str = "Process ended unexpectedly";
/// Message stored when the caller cancels an active transfer.
pub const CANCELLED: &str = "Cancelled";
/// Message stored alongside the `timeout` status.
pub const TIMED_OUT: &str = "No peers or metadata within the connect window";

/// Terminal records older than this are pruned when loading from disk.
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Lifecycle status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Worker spawned, waiting for metadata or peers.
    Connecting,
    /// Metadata known, bytes flowing.
    Downloading,
    /// Finished; `file_path` is set.
    Done,
    /// Failed, cancelled or lost; `error_message` is set.
    Error,
    /// Nothing arrived within the connect window.
    Timeout,
}

impl Status {
    pub fn is_active(self) -> bool {
        matches!(self, Status::Connecting | Status::Downloading)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    fn rank(self) -> u8 {
        match self {
            Status::Connecting => 0,
            Status::Downloading => 1,
            Status::Done | Status::Error | Status::Timeout => 2,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Connecting => "connecting",
            Status::Downloading => "downloading",
            Status::Done => "done",
            Status::Error => "error",
            Status::Timeout => "timeout",
        };
        f.pad(s)
    }
}

/// Snapshot of one transfer's lifecycle.
///
/// The caller owns `title` and `quality` plus the cancellation transition;
/// the worker owns every transfer field and its own terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    pub id: String,
    #[serde(default)]
    pub process_id: Option<u32>,
    pub content_ref: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub quality: String,
    /// File name reported by the worker's `meta` message.
    #[serde(default)]
    pub name: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub speed_bytes_per_sec: f64,
    #[serde(default)]
    pub eta_millis: u64,
    #[serde(default)]
    pub peer_count: u32,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
}

impl StateRecord {
    /// A fresh `connecting` record.
    pub fn new(
        id: impl Into<String>,
        content_ref: impl Into<String>,
        title: impl Into<String>,
        quality: impl Into<String>,
        started_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            process_id: None,
            content_ref: content_ref.into(),
            title: title.into(),
            quality: quality.into(),
            name: None,
            status: Status::Connecting,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed_bytes_per_sec: 0.0,
            eta_millis: 0,
            peer_count: 0,
            file_path: None,
            error_message: None,
            started_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Folds one worker message into the record.
    ///
    /// Returns `false` and leaves the record untouched when it is already
    /// terminal.
    pub fn apply(&mut self, message: &WorkerMessage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match message {
            WorkerMessage::Meta { name, total_bytes } => {
                self.status = Status::Downloading;
                self.name = Some(name.clone());
                self.total_bytes = *total_bytes;
            }
            WorkerMessage::Progress {
                progress_fraction,
                downloaded_bytes,
                total_bytes,
                speed_bytes_per_sec,
                eta_millis,
                peer_count,
            } => {
                self.status = Status::Downloading;
                let fraction = if progress_fraction.is_finite() {
                    progress_fraction.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                self.progress = self.progress.max(fraction);
                self.downloaded_bytes = *downloaded_bytes;
                self.total_bytes = *total_bytes;
                self.speed_bytes_per_sec = *speed_bytes_per_sec;
                self.eta_millis = *eta_millis;
                self.peer_count = *peer_count;
            }
            WorkerMessage::Done { file_path } => {
                self.status = Status::Done;
                self.progress = 1.0;
                self.file_path = Some(file_path.clone());
                self.error_message = None;
            }
            WorkerMessage::Error { message } => {
                self.status = Status::Error;
                self.error_message = Some(message.clone());
                self.file_path = None;
            }
            WorkerMessage::Timeout => {
                self.status = Status::Timeout;
                self.error_message = Some(TIMED_OUT.to_string());
                self.file_path = None;
            }
        }
        true
    }

    /// Moves an active record to `error` with the given message.
    pub fn fail(&mut self, message: &str) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = Status::Error;
        self.error_message = Some(message.to_string());
        self.file_path = None;
        true
    }

    /// Adopts the worker-owned fields of a copy read back from disk.
    ///
    /// Caller-owned fields stay as they are, status never moves backwards
    /// and progress never decreases.
    pub fn merge_worker_fields(&mut self, disk: &StateRecord) -> bool {
        if self.is_terminal() || disk.id != self.id {
            return false;
        }
        let before = self.clone();
        if disk.process_id.is_some() {
            self.process_id = disk.process_id;
        }
        if disk.status.rank() >= self.status.rank() {
            self.status = disk.status;
        }
        if disk.name.is_some() {
            self.name = disk.name.clone();
        }
        self.progress = self.progress.max(disk.progress.clamp(0.0, 1.0));
        self.downloaded_bytes = disk.downloaded_bytes;
        self.total_bytes = disk.total_bytes;
        self.speed_bytes_per_sec = disk.speed_bytes_per_sec;
        self.eta_millis = disk.eta_millis;
        self.peer_count = disk.peer_count;
        match self.status {
            Status::Done => {
                self.file_path = disk.file_path.clone();
                self.error_message = None;
            }
            Status::Error | Status::Timeout => {
                self.error_message = disk
                    .error_message
                    .clone()
                    .or_else(|| Some(UNEXPECTED_EXIT.to_string()));
                self.file_path = None;
            }
            Status::Connecting | Status::Downloading => {}
        }
        *self != before
    }

    /// Clears every worker-owned field back to the initial `connecting` state.
    pub fn reset_transfer(&mut self) {
        self.name = None;
        self.status = Status::Connecting;
        self.progress = 0.0;
        self.downloaded_bytes = 0;
        self.total_bytes = 0;
        self.speed_bytes_per_sec = 0.0;
        self.eta_millis = 0;
        self.peer_count = 0;
        self.file_path = None;
        self.error_message = None;
    }

    /// True for terminal records started before `now - retention`.
    pub fn is_expired(&self, now_millis: u64, retention: Duration) -> bool {
        let cutoff = now_millis.saturating_sub(retention.as_millis() as u64);
        self.is_terminal() && self.started_at < cutoff
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> StateRecord {
        StateRecord::new("1-0-abcd", "magnet:?xt=X", "Sample", "720p", 1_000)
    }

    fn progress(fraction: f64, downloaded: u64) -> WorkerMessage {
        WorkerMessage::Progress {
            progress_fraction: fraction,
            downloaded_bytes: downloaded,
            total_bytes: 1000,
            speed_bytes_per_sec: 100.0,
            eta_millis: 5000,
            peer_count: 3,
        }
    }

    #[test]
    fn test_new_record_is_connecting() {
        let r = record();
        assert_eq!(r.status, Status::Connecting);
        assert!(r.is_active());
        assert_eq!(r.downloaded_bytes, 0);
        assert!(r.file_path.is_none());
        assert!(r.error_message.is_none());
    }

    #[test]
    fn test_meta_moves_to_downloading() {
        let mut r = record();
        assert!(r.apply(&WorkerMessage::Meta {
            name: "s.mp4".into(),
            total_bytes: 1000,
        }));
        assert_eq!(r.status, Status::Downloading);
        assert_eq!(r.name.as_deref(), Some("s.mp4"));
        assert_eq!(r.total_bytes, 1000);
    }

    #[test]
    fn test_progress_from_connecting_moves_to_downloading() {
        let mut r = record();
        r.apply(&progress(0.5, 500));
        assert_eq!(r.status, Status::Downloading);
        assert_eq!(r.progress, 0.5);
        assert_eq!(r.downloaded_bytes, 500);
        assert_eq!(r.peer_count, 3);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut r = record();
        r.apply(&progress(0.6, 600));
        r.apply(&progress(0.4, 400));
        assert_eq!(r.progress, 0.6);
        r.apply(&progress(7.0, 1000));
        assert_eq!(r.progress, 1.0);
    }

    #[test]
    fn test_done_sets_file_path_only() {
        let mut r = record();
        r.apply(&WorkerMessage::Done {
            file_path: "/tmp/s.mp4".into(),
        });
        assert_eq!(r.status, Status::Done);
        assert_eq!(r.file_path.as_deref(), Some("/tmp/s.mp4"));
        assert!(r.error_message.is_none());
        assert_eq!(r.progress, 1.0);
    }

    #[test]
    fn test_error_and_timeout_set_message() {
        let mut r = record();
        r.apply(&WorkerMessage::Error {
            message: "tracker unreachable".into(),
        });
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.error_message.as_deref(), Some("tracker unreachable"));

        let mut r = record();
        r.apply(&WorkerMessage::Timeout);
        assert_eq!(r.status, Status::Timeout);
        assert_eq!(r.error_message.as_deref(), Some(TIMED_OUT));
        assert!(r.file_path.is_none());
    }

    #[test]
    fn test_terminal_states_absorb_every_message() {
        let messages = [
            WorkerMessage::Meta {
                name: "x".into(),
                total_bytes: 1,
            },
            progress(0.9, 900),
            WorkerMessage::Done {
                file_path: "/x".into(),
            },
            WorkerMessage::Error {
                message: "late".into(),
            },
            WorkerMessage::Timeout,
        ];
        for terminal in [
            WorkerMessage::Done {
                file_path: "/tmp/s.mp4".into(),
            },
            WorkerMessage::Error {
                message: "boom".into(),
            },
            WorkerMessage::Timeout,
        ] {
            let mut r = record();
            r.apply(&terminal);
            let frozen = r.clone();
            for m in &messages {
                assert!(!r.apply(m));
                assert_eq!(r, frozen);
            }
            assert!(!r.fail(CANCELLED));
            assert_eq!(r, frozen);
        }
    }

    #[test]
    fn test_fail_only_applies_to_active() {
        let mut r = record();
        assert!(r.fail(CANCELLED));
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.error_message.as_deref(), Some(CANCELLED));
        assert!(!r.fail(UNEXPECTED_EXIT));
        assert_eq!(r.error_message.as_deref(), Some(CANCELLED));
    }

    #[test]
    fn test_merge_keeps_caller_fields() {
        let mut mem = record();
        let mut disk = record();
        disk.title = "stale title".into();
        disk.process_id = Some(42);
        disk.apply(&progress(0.4, 400));

        assert!(mem.merge_worker_fields(&disk));
        assert_eq!(mem.title, "Sample");
        assert_eq!(mem.status, Status::Downloading);
        assert_eq!(mem.progress, 0.4);
        assert_eq!(mem.process_id, Some(42));
    }

    #[test]
    fn test_merge_never_moves_backwards() {
        let mut mem = record();
        mem.apply(&progress(0.7, 700));
        let disk = record();

        mem.merge_worker_fields(&disk);
        assert_eq!(mem.status, Status::Downloading);
        assert_eq!(mem.progress, 0.7);
    }

    #[test]
    fn test_merge_adopts_terminal_outcome() {
        let mut mem = record();
        let mut disk = record();
        disk.apply(&WorkerMessage::Done {
            file_path: "/tmp/s.mp4".into(),
        });
        assert!(mem.merge_worker_fields(&disk));
        assert_eq!(mem.status, Status::Done);
        assert_eq!(mem.file_path.as_deref(), Some("/tmp/s.mp4"));
    }

    #[test]
    fn test_expiry_only_for_old_terminal_records() {
        let day = RETENTION.as_millis() as u64;
        let now = 10 * day;
        let mut old = record();
        old.started_at = now - day - 1;
        assert!(!old.is_expired(now, RETENTION));
        old.fail(CANCELLED);
        assert!(old.is_expired(now, RETENTION));

        let mut fresh = record();
        fresh.started_at = now - 1000;
        fresh.fail(CANCELLED);
        assert!(!fresh.is_expired(now, RETENTION));
    }

    #[test]
    fn test_json_uses_camel_case_fields() {
        let mut r = record();
        r.process_id = Some(7);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["processId"], 7);
        assert_eq!(json["contentRef"], "magnet:?xt=X");
        assert_eq!(json["status"], "connecting");
        assert_eq!(json["startedAt"], 1000);
        assert!(json.get("downloadedBytes").is_some());
    }
}
