//! Store-and-forward queue (spec §4.6): bounded 50-per-peer FIFO, drained
//! when the destination reappears within a 24-hour retention window.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::protocol::{Frame, PeerId};

struct Entry {
    frame: Frame,
    stored_at: Instant,
}

pub struct StoreAndForward {
    capacity_per_peer: usize,
    retention: Duration,
    queues: HashMap<PeerId, VecDeque<Entry>>,
}

impl StoreAndForward {
    pub fn new(capacity_per_peer: usize, retention: Duration) -> Self {
        Self {
            capacity_per_peer,
            retention,
            queues: HashMap::new(),
        }
    }

    /// Enqueues `frame` for `destination`. Errors once the per-peer queue is
    /// full rather than silently dropping the oldest entry, per spec §7's
    /// `CapacityError`.
    pub fn enqueue(&mut self, destination: PeerId, frame: Frame) -> Result<()> {
        let queue = self.queues.entry(destination).or_default();
        if queue.len() >= self.capacity_per_peer {
            return Err(Error::Capacity(format!(
                "store-and-forward queue full for peer {destination}"
            )));
        }
        queue.push_back(Entry {
            frame,
            stored_at: Instant::now(),
        });
        Ok(())
    }

    /// Drains every still-live frame queued for `destination`, in FIFO
    /// order, dropping anything past the retention window along the way.
    pub fn drain(&mut self, destination: &PeerId) -> Vec<Frame> {
        let now = Instant::now();
        match self.queues.remove(destination) {
            Some(queue) => queue
                .into_iter()
                .filter(|e| now.duration_since(e.stored_at) <= self.retention)
                .map(|e| e.frame)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn queued_len(&self, destination: &PeerId) -> usize {
        self.queues.get(destination).map(|q| q.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameType;

    fn peer(n: u8) -> PeerId {
        PeerId::from_hex(&format!("{n:012x}")).unwrap()
    }

    fn frame() -> Frame {
        Frame::new(FrameType::FileChunk, 2, peer(1), Some(peer(2)), 0, vec![])
    }

    #[test]
    fn enforces_per_peer_capacity() {
        let mut saf = StoreAndForward::new(2, Duration::from_secs(3600));
        saf.enqueue(peer(9), frame()).unwrap();
        saf.enqueue(peer(9), frame()).unwrap();
        assert!(saf.enqueue(peer(9), frame()).is_err());
    }

    #[test]
    fn drain_returns_fifo_order_and_clears_queue() {
        let mut saf = StoreAndForward::new(10, Duration::from_secs(3600));
        saf.enqueue(peer(9), frame()).unwrap();
        saf.enqueue(peer(9), frame()).unwrap();
        assert_eq!(saf.drain(&peer(9)).len(), 2);
        assert_eq!(saf.queued_len(&peer(9)), 0);
    }
}
