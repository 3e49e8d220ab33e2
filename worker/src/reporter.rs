//! Emits protocol lines and mirrors them into the durable state slot.

use dlm_core::store::{read_slot, write_slot};
use dlm_core::{StateRecord, Status, StoreError, WorkerMessage, now_millis};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Result of opening a state slot at worker startup.
#[derive(Debug)]
pub enum Startup<W: Write> {
    Ready(Reporter<W>),
    /// The slot already holds a terminal record, e.g. cancelled before we ran.
    AlreadyFinished(Status),
}

/// Worker-side owner of the transfer fields of one record.
#[derive(Debug)]
pub struct Reporter<W: Write> {
    record: StateRecord,
    slot: PathBuf,
    out: W,
    out_broken: bool,
    finished: bool,
}

impl<W: Write> Reporter<W> {
    /// Reads any record already at `slot`, keeps its caller-supplied fields,
    /// resets the transfer fields, stamps our pid and writes it back.
    pub async fn open(slot: &Path, content_ref: &str, out: W) -> Result<Startup<W>, StoreError> {
        let mut record = match read_slot(slot).await {
            Some(existing) if existing.is_terminal() => {
                return Ok(Startup::AlreadyFinished(existing.status));
            }
            Some(mut existing) => {
                existing.reset_transfer();
                existing
            }
            None => {
                let id = slot
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                StateRecord::new(id, content_ref, "", "", now_millis())
            }
        };
        record.process_id = Some(std::process::id());
        write_slot(slot, &record).await?;

        Ok(Startup::Ready(Self {
            record,
            slot: slot.to_path_buf(),
            out,
            out_broken: false,
            finished: false,
        }))
    }

    pub fn record(&self) -> &StateRecord {
        &self.record
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Writes `message` to stdout and the slot.
    ///
    /// Returns `false` without emitting anything once a terminal message was
    /// sent, when the slot shows the transfer was finished by someone else, or
    /// when the slot was deleted.
    pub async fn emit(&mut self, message: &WorkerMessage) -> bool {
        if self.finished {
            return false;
        }
        let Some(disk) = read_slot(&self.slot).await else {
            tracing::info!(id = %self.record.id, slot = %self.slot.display(), "state slot removed; stopping");
            self.finished = true;
            return false;
        };
        if disk.is_terminal() {
            tracing::info!(id = %self.record.id, status = %disk.status, "transfer finished elsewhere; stopping");
            self.finished = true;
            return false;
        }
        self.record.title = disk.title;
        self.record.quality = disk.quality;

        self.write_line(message);
        self.record.apply(message);
        if message.is_terminal() {
            self.finished = true;
        }
        if let Err(err) = write_slot(&self.slot, &self.record).await {
            tracing::warn!(path = %self.slot.display(), error = %err, "failed to update state slot");
        }
        true
    }

    // A vanished reader is not fatal; the slot keeps carrying progress.
    fn write_line(&mut self, message: &WorkerMessage) {
        if self.out_broken {
            return;
        }
        let result = writeln!(self.out, "{}", message.to_line()).and_then(|_| self.out.flush());
        if let Err(err) = result {
            tracing::debug!(error = %err, "stdout closed; continuing with state slot only");
            self.out_broken = true;
        }
    }
}
