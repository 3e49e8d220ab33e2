use clap::{Parser, Subcommand};
use dlm_core::{StateRecord, Status};
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Start and monitor background downloads", long_about = None)]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Data directory for finished files and transfer state
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a transfer in the background
    Start {
        /// Content reference handed to the worker (magnet URI, file URL, path)
        content_ref: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        quality: String,
        /// Keep showing status until the transfer finishes
        #[arg(long)]
        watch: bool,
    },
    /// Print every known transfer
    List {
        /// Only connecting or downloading transfers
        #[arg(long)]
        active: bool,
    },
    /// Refresh and print status until nothing is active
    Watch,
    /// Stop an active transfer
    Cancel { id: String },
    /// Remove finished, failed and timed-out transfers
    Clear,
    /// Stop and remove a transfer regardless of its status
    Delete { id: String },
}

/// Renders records as a plain-text table.
pub fn render_table(records: &[StateRecord]) -> String {
    if records.is_empty() {
        return "no transfers\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<28} {:<11} {:>6} {:>21} {:>10} {:>8} {:>5}  TITLE",
        "ID", "STATUS", "DONE", "BYTES", "SPEED", "ETA", "PEERS"
    );
    for r in records {
        let _ = writeln!(
            out,
            "{:<28} {:<11} {:>5.1}% {:>21} {:>10} {:>8} {:>5}  {}",
            r.id,
            r.status,
            r.progress * 100.0,
            format!(
                "{}/{}",
                human_bytes(r.downloaded_bytes),
                human_bytes(r.total_bytes)
            ),
            format!("{}/s", human_bytes(r.speed_bytes_per_sec as u64)),
            human_eta(r.eta_millis),
            r.peer_count,
            label(r),
        );
        match r.status {
            Status::Done => {
                if let Some(path) = &r.file_path {
                    let _ = writeln!(out, "{:<28} -> {path}", "");
                }
            }
            Status::Error | Status::Timeout => {
                if let Some(msg) = &r.error_message {
                    let _ = writeln!(out, "{:<28} !! {msg}", "");
                }
            }
            Status::Connecting | Status::Downloading => {}
        }
    }
    out
}

fn label(r: &StateRecord) -> String {
    let title: &str = if r.title.is_empty() {
        r.name.as_deref().unwrap_or(&r.content_ref)
    } else {
        &r.title
    };
    if r.quality.is_empty() {
        title.to_string()
    } else {
        format!("{title} [{}]", r.quality)
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn human_eta(millis: u64) -> String {
    if millis == 0 {
        return "-".to_string();
    }
    let secs = millis.div_ceil(1000);
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m{:02}s", s / 60, s % 60),
        s => format!("{}h{:02}m", s / 3600, (s % 3600) / 60),
    }
}
