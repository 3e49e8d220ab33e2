use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Transfer one item and report progress as JSON lines", long_about = None)]
pub struct Args {
    /// Content reference to transfer (file URL or path)
    pub content_ref: String,

    /// Directory the finished file is written to; created if absent
    pub target_dir: PathBuf,

    /// Durable state slot for this transfer
    pub state_path: PathBuf,

    /// Give up when no metadata arrives within this many seconds
    #[arg(long, default_value_t = 30)]
    pub connect_timeout_secs: u64,

    /// Interval between progress lines
    #[arg(long, default_value_t = 500)]
    pub progress_interval_ms: u64,

    /// Throttle the transfer to this many bytes per second
    #[arg(long)]
    pub rate_limit: Option<u64>,
}

impl Args {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_inputs_and_defaults() {
        let args = Args::parse_from(["dlm-worker", "file:///a.bin", "/out", "/out/.state/1.json"]);
        assert_eq!(args.content_ref, "file:///a.bin");
        assert_eq!(args.target_dir, PathBuf::from("/out"));
        assert_eq!(args.state_path, PathBuf::from("/out/.state/1.json"));
        assert_eq!(args.connect_timeout(), Duration::from_secs(30));
        assert_eq!(args.progress_interval(), Duration::from_millis(500));
        assert_eq!(args.rate_limit, None);
    }

    #[test]
    fn test_flags_before_positionals() {
        let args = Args::parse_from([
            "dlm-worker",
            "--connect-timeout-secs",
            "5",
            "--rate-limit",
            "1024",
            "a",
            "b",
            "c",
        ]);
        assert_eq!(args.connect_timeout_secs, 5);
        assert_eq!(args.rate_limit, Some(1024));
        assert_eq!(args.content_ref, "a");
    }
}
