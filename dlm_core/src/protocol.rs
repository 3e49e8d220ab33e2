//! Line-delimited JSON messages a worker writes to its stdout.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};

/// One event reported by a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// Size of the transfer became known. Sent once.
    #[serde(rename_all = "camelCase")]
    Meta {
        name: String,
        #[serde(deserialize_with = "any_number_u64")]
        total_bytes: u64,
    },
    /// Periodic sample while bytes are flowing.
    #[serde(rename_all = "camelCase")]
    Progress {
        progress_fraction: f64,
        #[serde(deserialize_with = "any_number_u64")]
        downloaded_bytes: u64,
        #[serde(deserialize_with = "any_number_u64")]
        total_bytes: u64,
        speed_bytes_per_sec: f64,
        #[serde(deserialize_with = "any_number_u64")]
        eta_millis: u64,
        #[serde(deserialize_with = "any_number_u32")]
        peer_count: u32,
    },
    /// Terminal: the file is complete at `file_path`.
    #[serde(rename_all = "camelCase")]
    Done { file_path: String },
    /// Terminal: the engine failed.
    Error { message: String },
    /// Terminal: no peers or metadata within the connect window.
    Timeout,
}

impl WorkerMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerMessage::Done { .. } | WorkerMessage::Error { .. } | WorkerMessage::Timeout
        )
    }

    /// Parses one line. Blank or malformed lines yield `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str(line) {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::trace!(error = %err, line, "ignoring malformed worker line");
                None
            }
        }
    }

    /// Serializes the message as a single line without the terminator.
    pub fn to_line(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// Engines may report counters as floats or negatives; round and saturate
// instead of rejecting the whole line.
fn any_number_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(value) = number.as_u64() {
        return Ok(value);
    }
    Ok(match number.as_f64() {
        Some(value) if value.is_finite() && value > 0.0 => value.round() as u64,
        _ => 0,
    })
}

fn any_number_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = any_number_u64(deserializer)?;
    Ok(u32::try_from(value).unwrap_or(u32::MAX))
}

/// Reassembles newline-terminated lines from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw = self.pending.split_to(pos);
            self.pending.advance(1);
            let mut line = String::from_utf8_lossy(&raw).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Returns the unterminated tail, if any, once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = self.pending.split();
        Some(String::from_utf8_lossy(&raw).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_kind() {
        assert_eq!(
            WorkerMessage::parse_line(r#"{"type":"meta","name":"s.mp4","totalBytes":1000}"#),
            Some(WorkerMessage::Meta {
                name: "s.mp4".into(),
                total_bytes: 1000
            })
        );
        assert_eq!(
            WorkerMessage::parse_line(
                r#"{"type":"progress","progressFraction":0.5,"downloadedBytes":500,"totalBytes":1000,"speedBytesPerSec":100,"etaMillis":5000,"peerCount":3}"#
            ),
            Some(WorkerMessage::Progress {
                progress_fraction: 0.5,
                downloaded_bytes: 500,
                total_bytes: 1000,
                speed_bytes_per_sec: 100.0,
                eta_millis: 5000,
                peer_count: 3,
            })
        );
        assert_eq!(
            WorkerMessage::parse_line(r#"{"type":"done","filePath":"/tmp/s.mp4"}"#),
            Some(WorkerMessage::Done {
                file_path: "/tmp/s.mp4".into()
            })
        );
        assert_eq!(
            WorkerMessage::parse_line(r#"{"type":"error","message":"boom"}"#),
            Some(WorkerMessage::Error {
                message: "boom".into()
            })
        );
        assert_eq!(
            WorkerMessage::parse_line(r#"{"type":"timeout"}"#),
            Some(WorkerMessage::Timeout)
        );
    }

    #[test]
    fn test_fractional_and_negative_counters_are_accepted() {
        let line = r#"{"type":"progress","progressFraction":0.5,"downloadedBytes":500.0,"totalBytes":1000,"speedBytesPerSec":100.25,"etaMillis":5000.5,"peerCount":3.0}"#;
        assert_eq!(
            WorkerMessage::parse_line(line),
            Some(WorkerMessage::Progress {
                progress_fraction: 0.5,
                downloaded_bytes: 500,
                total_bytes: 1000,
                speed_bytes_per_sec: 100.25,
                eta_millis: 5001,
                peer_count: 3,
            })
        );

        let line = r#"{"type":"progress","progressFraction":0.1,"downloadedBytes":1,"totalBytes":10,"speedBytesPerSec":0,"etaMillis":-1,"peerCount":1e12}"#;
        match WorkerMessage::parse_line(line) {
            Some(WorkerMessage::Progress {
                eta_millis,
                peer_count,
                ..
            }) => {
                assert_eq!(eta_millis, 0);
                assert_eq!(peer_count, u32::MAX);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            WorkerMessage::parse_line(r#"{"type":"meta","name":"a","totalBytes":"1000"}"#),
            None
        );
    }

    #[test]
    fn test_malformed_lines_are_ignored() {
        assert_eq!(WorkerMessage::parse_line(""), None);
        assert_eq!(WorkerMessage::parse_line("   "), None);
        assert_eq!(WorkerMessage::parse_line("not json"), None);
        assert_eq!(WorkerMessage::parse_line(r#"{"type":"bogus"}"#), None);
        assert_eq!(WorkerMessage::parse_line(r#"{"type":"meta"}"#), None);
    }

    #[test]
    fn test_to_line_parses_back() {
        let msg = WorkerMessage::Done {
            file_path: "/data/a b.mkv".into(),
        };
        let line = msg.to_line();
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""type":"done""#));
        assert_eq!(WorkerMessage::parse_line(&line), Some(msg));
    }

    #[test]
    fn test_line_buffer_joins_split_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(br#"{"type":"me"#).is_empty());
        assert!(buf.push(br#"ta","name":"a","totalB"#).is_empty());
        let lines = buf.push(b"ytes\":5}\n{\"type\":\"tim");
        assert_eq!(lines, vec![r#"{"type":"meta","name":"a","totalBytes":5}"#.to_string()]);
        let lines = buf.push(b"eout\"}\n");
        assert_eq!(lines, vec![r#"{"type":"timeout"}"#.to_string()]);
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_line_buffer_keeps_order_within_chunk() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"one\ntwo\r\n\nthree\n");
        assert_eq!(lines, vec!["one", "two", "", "three"]);
    }

    #[test]
    fn test_line_buffer_finish_returns_tail() {
        let mut buf = LineBuffer::new();
        buf.push(b"complete\npartial");
        assert_eq!(buf.finish().as_deref(), Some("partial"));
        assert_eq!(buf.finish(), None);
    }
}
