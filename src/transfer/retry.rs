//! Per-chunk retry with exponential backoff, spec §4.7.3:
//! `delay = base * 2^attempts * jitter`, `jitter ~ Uniform(0.8, 1.2)`.

use std::time::Duration;

use rand::Rng;

pub const MAX_ATTEMPTS: u8 = 5;
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Computes the delay before the next retry, given how many attempts have
/// already been made (0 on the first retry).
pub fn backoff_delay(attempts: u8) -> Duration {
    let factor = 2u32.saturating_pow(attempts as u32);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    BASE_DELAY.mul_f64(factor as f64 * jitter)
}

/// Per-chunk retry counters for one transfer.
#[derive(Debug, Default)]
pub struct RetryCounters {
    attempts: std::collections::HashMap<u32, u8>,
}

impl RetryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a retry for `chunk_index` and returns the delay to wait, or
    /// `None` if `MAX_ATTEMPTS` has been exhausted (the caller should move
    /// the transfer to `Failed{reason: ChunkExhausted}`).
    pub fn schedule_retry(&mut self, chunk_index: u32) -> Option<Duration> {
        let attempts = self.attempts.entry(chunk_index).or_insert(0);
        if *attempts >= MAX_ATTEMPTS {
            return None;
        }
        let delay = backoff_delay(*attempts);
        *attempts += 1;
        Some(delay)
    }

    pub fn clear(&mut self, chunk_index: u32) {
        self.attempts.remove(&chunk_index);
    }

    pub fn clear_all(&mut self) {
        self.attempts.clear();
    }
}
