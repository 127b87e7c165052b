//! Sliding-window rate limiting for handshakes and messages (spec §4.3.2).
//!
//! A token bucket would smooth bursts across the window; the spec instead
//! pins an exact count per exact window, so this keeps a timestamped deque
//! and prunes anything older than the window on each check.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct SlidingWindowCounter {
    window: Duration,
    limit: u32,
    events: VecDeque<Instant>,
}

impl SlidingWindowCounter {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            window,
            limit,
            events: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.events.front() {
            if now.duration_since(front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records one event at `now` and reports whether the window limit was
    /// exceeded (the event is still recorded either way, matching
    /// "count and then reject" semantics for the caller's backoff).
    pub fn record(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.events.push_back(now);
        self.events.len() as u32 <= self.limit
    }

    pub fn count(&mut self, now: Instant) -> u32 {
        self.prune(now);
        self.events.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let mut counter = SlidingWindowCounter::new(Duration::from_secs(60), 3);
        let t0 = Instant::now();
        assert!(counter.record(t0));
        assert!(counter.record(t0));
        assert!(counter.record(t0));
        assert!(!counter.record(t0));
    }

    #[test]
    fn window_slides_forward() {
        let mut counter = SlidingWindowCounter::new(Duration::from_millis(50), 1);
        let t0 = Instant::now();
        assert!(counter.record(t0));
        assert!(!counter.record(t0));
        let later = t0 + Duration::from_millis(60);
        assert!(counter.record(later));
    }
}
