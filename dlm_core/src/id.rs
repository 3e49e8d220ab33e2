use std::sync::atomic::{AtomicU64, Ordering};

/// Produces record ids of the form `<unix-millis>-<counter>-<random>`.
///
/// The counter keeps ids unique within a process; the random suffix keeps two
/// front ends started in the same millisecond apart.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let salt: u16 = rand::random();
        format!("{}-{seq}-{salt:04x}", crate::record::now_millis())
    }
}
