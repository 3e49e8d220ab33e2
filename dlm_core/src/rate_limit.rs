//! Byte-rate token bucket used to throttle transfer engines.

use std::time::{Duration, Instant};

/// A token bucket measured in bytes.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64, // bytes per second
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket holding one second worth of `bytes_per_sec`, starting full.
    pub fn per_second(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec.max(1) as f64;
        Self::new(rate, rate)
    }

    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    /// How long until `amount` tokens are available. Zero if they already are.
    ///
    /// Requests larger than the capacity are measured against the capacity.
    pub fn wait_time(&mut self, amount: f64) -> Duration {
        self.refill();
        let wanted = amount.min(self.capacity);
        if self.tokens >= wanted {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((wanted - self.tokens) / self.refill_rate)
    }

    /// Waits until `amount` bytes may pass, then takes them.
    pub async fn acquire(&mut self, amount: u64) {
        let amount = (amount as f64).min(self.capacity);
        loop {
            let wait = self.wait_time(amount);
            if wait.is_zero() {
                self.tokens -= amount;
                return;
            }
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        let new_tokens = elapsed * self.refill_rate;

        if new_tokens > 0.0 {
            self.tokens = (self.tokens + new_tokens).min(self.capacity);
            self.last_refill = now;
        }
    }
}
