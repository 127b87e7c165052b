//! Duplicate suppression over `(sender_id, timestamp_ms)` pairs, spec
//! §4.6: a sliding 10-minute window, grounded in the same
//! hash-plus-order-queue shape used for message deduplication.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::protocol::PeerId;

pub struct Deduplicator {
    window: Duration,
    seen: HashSet<(PeerId, u64)>,
    order: VecDeque<((PeerId, u64), Instant)>,
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((key, seen_at)) = self.order.front() {
            if now.duration_since(*seen_at) > self.window {
                self.seen.remove(key);
                self.order.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns `true` if this `(sender_id, timestamp_ms)` pair was already
    /// seen within the window (the frame should be dropped); otherwise
    /// records it and returns `false`.
    pub fn is_duplicate(&mut self, sender_id: PeerId, timestamp_ms: u64) -> bool {
        let now = Instant::now();
        self.evict_expired(now);
        let key = (sender_id, timestamp_ms);
        if self.seen.contains(&key) {
            return true;
        }
        self.seen.insert(key);
        self.order.push_back((key, now));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::from_hex(&format!("{n:012x}")).unwrap()
    }

    #[test]
    fn second_occurrence_is_flagged_duplicate() {
        let mut dedup = Deduplicator::new(Duration::from_secs(600));
        assert!(!dedup.is_duplicate(peer(1), 100));
        assert!(dedup.is_duplicate(peer(1), 100));
    }

    #[test]
    fn distinct_timestamps_are_not_duplicates() {
        let mut dedup = Deduplicator::new(Duration::from_secs(600));
        assert!(!dedup.is_duplicate(peer(1), 100));
        assert!(!dedup.is_duplicate(peer(1), 101));
    }
}
