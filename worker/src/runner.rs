use dlm_core::WorkerMessage;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::engine::{EngineEvent, TransferEngine};
use crate::meter::ProgressMeter;
use crate::reporter::Reporter;

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Metadata must arrive within this window or the run ends in `timeout`.
    pub connect_timeout: Duration,
    pub progress_interval: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done(PathBuf),
    Failed(String),
    TimedOut,
    /// The slot was finished by the manager (cancelled) while we ran.
    Halted,
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Done(_) | Outcome::TimedOut | Outcome::Halted => 0,
            Outcome::Failed(_) => 1,
        }
    }
}

/// Drives `engine` to completion, emitting exactly one terminal message
/// unless the transfer is halted from outside.
pub async fn run<E, W>(
    engine: E,
    target_dir: PathBuf,
    reporter: &mut Reporter<W>,
    settings: &RunSettings,
) -> Outcome
where
    E: TransferEngine,
    W: Write,
{
    let (tx, mut rx) = mpsc::channel(64);
    let transfer = engine.transfer(target_dir, tx);
    tokio::pin!(transfer);
    let connect_deadline = tokio::time::sleep(settings.connect_timeout);
    tokio::pin!(connect_deadline);
    let mut ticker = tokio::time::interval(settings.progress_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.reset();

    let mut meter: Option<ProgressMeter> = None;
    let mut events_open = true;

    let result = loop {
        tokio::select! {
            result = &mut transfer => break result,
            event = rx.recv(), if events_open => match event {
                Some(event) => {
                    if !on_event(event, &mut meter, reporter).await {
                        return Outcome::Halted;
                    }
                }
                None => events_open = false,
            },
            _ = ticker.tick(), if meter.is_some() => {
                if let Some(meter) = meter.as_mut()
                    && !reporter.emit(&meter.sample()).await
                {
                    return Outcome::Halted;
                }
            }
            _ = &mut connect_deadline, if meter.is_none() => {
                tracing::info!(timeout = ?settings.connect_timeout, "no metadata within the connect window");
                if !reporter.emit(&WorkerMessage::Timeout).await {
                    return Outcome::Halted;
                }
                return Outcome::TimedOut;
            }
        }
    };

    while let Ok(event) = rx.try_recv() {
        if !on_event(event, &mut meter, reporter).await {
            return Outcome::Halted;
        }
    }

    match result {
        Ok(path) => {
            if let Some(meter) = meter.as_mut()
                && !reporter.emit(&meter.complete()).await
            {
                return Outcome::Halted;
            }
            let file_path = path.to_string_lossy().into_owned();
            if !reporter.emit(&WorkerMessage::Done { file_path }).await {
                return Outcome::Halted;
            }
            Outcome::Done(path)
        }
        Err(err) => {
            let message = err.to_string();
            tracing::warn!(error = %message, "transfer failed");
            if !reporter
                .emit(&WorkerMessage::Error {
                    message: message.clone(),
                })
                .await
            {
                return Outcome::Halted;
            }
            Outcome::Failed(message)
        }
    }
}

async fn on_event<W: Write>(
    event: EngineEvent,
    meter: &mut Option<ProgressMeter>,
    reporter: &mut Reporter<W>,
) -> bool {
    match event {
        EngineEvent::Metadata { name, total_bytes } => {
            *meter = Some(ProgressMeter::new(total_bytes));
            reporter
                .emit(&WorkerMessage::Meta { name, total_bytes })
                .await
        }
        EngineEvent::Transferred {
            downloaded_bytes,
            peers,
        } => {
            if let Some(meter) = meter.as_mut() {
                meter.update(downloaded_bytes, peers);
            }
            true
        }
    }
}
