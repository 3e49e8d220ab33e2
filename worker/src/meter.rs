use dlm_core::WorkerMessage;
use std::time::Instant;

/// Turns cumulative byte counts into periodic progress samples.
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    total: u64,
    downloaded: u64,
    peers: u32,
    last_bytes: u64,
    last_at: Instant,
    speed: f64,
}

impl ProgressMeter {
    pub fn new(total: u64) -> Self {
        Self::starting_at(total, Instant::now())
    }

    pub fn starting_at(total: u64, now: Instant) -> Self {
        Self {
            total,
            downloaded: 0,
            peers: 0,
            last_bytes: 0,
            last_at: now,
            speed: 0.0,
        }
    }

    pub fn update(&mut self, downloaded: u64, peers: u32) {
        self.downloaded = downloaded;
        self.peers = peers;
    }

    /// A progress message with speed measured since the previous sample.
    pub fn sample_at(&mut self, now: Instant) -> WorkerMessage {
        let elapsed = now.saturating_duration_since(self.last_at).as_secs_f64();
        if elapsed > 0.0 {
            let delta = self.downloaded.saturating_sub(self.last_bytes);
            self.speed = delta as f64 / elapsed;
            self.last_bytes = self.downloaded;
            self.last_at = now;
        }
        self.message()
    }

    pub fn sample(&mut self) -> WorkerMessage {
        self.sample_at(Instant::now())
    }

    /// Final sample once the engine reports completion.
    pub fn complete(&mut self) -> WorkerMessage {
        if self.total > 0 {
            self.downloaded = self.total;
        }
        let mut msg = self.sample();
        if let WorkerMessage::Progress {
            progress_fraction,
            eta_millis,
            ..
        } = &mut msg
        {
            *progress_fraction = 1.0;
            *eta_millis = 0;
        }
        msg
    }

    fn message(&self) -> WorkerMessage {
        let fraction = if self.total > 0 {
            (self.downloaded as f64 / self.total as f64).min(1.0)
        } else {
            0.0
        };
        let remaining = self.total.saturating_sub(self.downloaded);
        let eta_millis = if self.speed > 0.0 && remaining > 0 {
            (remaining as f64 / self.speed * 1000.0).round() as u64
        } else {
            0
        };
        WorkerMessage::Progress {
            progress_fraction: fraction,
            downloaded_bytes: self.downloaded,
            total_bytes: self.total,
            speed_bytes_per_sec: self.speed,
            eta_millis,
            peer_count: self.peers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_speed_and_eta_over_interval() {
        let t0 = Instant::now();
        let mut meter = ProgressMeter::starting_at(1000, t0);
        meter.update(250, 4);

        let msg = meter.sample_at(t0 + Duration::from_millis(500));
        assert_eq!(
            msg,
            WorkerMessage::Progress {
                progress_fraction: 0.25,
                downloaded_bytes: 250,
                total_bytes: 1000,
                speed_bytes_per_sec: 500.0,
                eta_millis: 1500,
                peer_count: 4,
            }
        );
    }

    #[test]
    fn test_stalled_transfer_reports_zero_speed_and_no_eta() {
        let t0 = Instant::now();
        let mut meter = ProgressMeter::starting_at(1000, t0);
        meter.update(100, 1);
        meter.sample_at(t0 + Duration::from_secs(1));
        match meter.sample_at(t0 + Duration::from_secs(2)) {
            WorkerMessage::Progress {
                speed_bytes_per_sec,
                eta_millis,
                ..
            } => {
                assert_eq!(speed_bytes_per_sec, 0.0);
                assert_eq!(eta_millis, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_total_keeps_fraction_at_zero() {
        let mut meter = ProgressMeter::new(0);
        meter.update(4096, 2);
        match meter.sample() {
            WorkerMessage::Progress {
                progress_fraction, ..
            } => assert_eq!(progress_fraction, 0.0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_complete_reports_full_progress() {
        let mut meter = ProgressMeter::new(10);
        meter.update(7, 1);
        match meter.complete() {
            WorkerMessage::Progress {
                progress_fraction,
                downloaded_bytes,
                eta_millis,
                ..
            } => {
                assert_eq!(progress_fraction, 1.0);
                assert_eq!(downloaded_bytes, 10);
                assert_eq!(eta_millis, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
