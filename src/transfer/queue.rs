//! Transfer admission queue (spec §4.7.4): at most 3 concurrent transfers,
//! priority first then FIFO within priority.

use std::collections::{HashSet, VecDeque};

use crate::protocol::Priority;
use crate::transfer::state::TransferId;

const MAX_CONCURRENT_TRANSFERS: usize = 3;

struct QueuedEntry {
    transfer_id: TransferId,
    priority: Priority,
}

#[derive(Default)]
pub struct TransferQueue {
    waiting: VecDeque<QueuedEntry>,
    active: HashSet<TransferId>,
    max_concurrent: usize,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self {
            waiting: VecDeque::new(),
            active: HashSet::new(),
            max_concurrent: MAX_CONCURRENT_TRANSFERS,
        }
    }

    /// Inserts `transfer_id` ahead of every lower-priority entry already
    /// waiting, but behind same-or-higher priority entries (FIFO within a
    /// priority tier).
    pub fn enqueue(&mut self, transfer_id: TransferId, priority: Priority) {
        let insert_at = self
            .waiting
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.waiting.len());
        self.waiting.insert(insert_at, QueuedEntry { transfer_id, priority });
    }

    /// Promotes as many waiting transfers to active as the concurrency cap
    /// allows, returning the ids that were started.
    pub fn admit(&mut self) -> Vec<TransferId> {
        let mut started = Vec::new();
        while self.active.len() < self.max_concurrent {
            match self.waiting.pop_front() {
                Some(entry) => {
                    self.active.insert(entry.transfer_id);
                    started.push(entry.transfer_id);
                }
                None => break,
            }
        }
        started
    }

    pub fn complete(&mut self, transfer_id: &TransferId) {
        self.active.remove(transfer_id);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, transfer_id: &TransferId) -> bool {
        self.active.contains(transfer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_at_most_three_concurrently() {
        let mut queue = TransferQueue::new();
        for _ in 0..5 {
            queue.enqueue(TransferId::new(), Priority::Normal);
        }
        let started = queue.admit();
        assert_eq!(started.len(), 3);
        assert_eq!(queue.active_count(), 3);
        assert!(queue.admit().is_empty());
    }

    #[test]
    fn higher_priority_is_admitted_first() {
        let mut queue = TransferQueue::new();
        let low = TransferId::new();
        let urgent = TransferId::new();
        queue.enqueue(low, Priority::Low);
        queue.enqueue(urgent, Priority::Urgent);
        let started = queue.admit();
        assert_eq!(started[0], urgent);
    }

    #[test]
    fn completing_frees_a_slot() {
        let mut queue = TransferQueue::new();
        let ids: Vec<_> = (0..4).map(|_| TransferId::new()).collect();
        for id in &ids {
            queue.enqueue(*id, Priority::Normal);
        }
        queue.admit();
        assert!(!queue.is_active(&ids[3]));
        queue.complete(&ids[0]);
        let started = queue.admit();
        assert_eq!(started, vec![ids[3]]);
    }
}
