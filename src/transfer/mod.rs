//! Chunked transfer engine (C7): ties the sender/receiver state machines,
//! the admission queue, and per-chunk retry together behind a
//! `DashMap<TransferId, _>`, per §4.9's concurrency-model note.

pub mod compression;
pub mod queue;
pub mod receiver;
pub mod retry;
pub mod sender;
pub mod state;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::blob::BlobStore;
use crate::error::{Error, Result};
use crate::protocol::ack::Ack;
use crate::protocol::chunk::Chunk;
use crate::protocol::manifest::Manifest;
use crate::protocol::types::{PeerId, Priority};

use queue::TransferQueue;
use receiver::ReceiverTransfer;
use sender::SenderTransfer;
pub use state::{Direction, FailureReason, TransferId, TransferStatus, TransferSummary, TransferWarnings};

/// One side of an in-flight transfer: either we're sending or receiving.
enum Side {
    Outgoing(SenderTransfer),
    Incoming(ReceiverTransfer),
}

/// Events the transfer engine reports to the facade.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Started { transfer_id: TransferId, peer_id: PeerId, direction: Direction },
    Progress { transfer_id: TransferId, fraction: f32 },
    Paused { transfer_id: TransferId },
    Resumed { transfer_id: TransferId },
    Completed { transfer_id: TransferId },
    Failed { transfer_id: TransferId, reason: FailureReason, retryable: bool },
}

pub struct TransferManager {
    self_id: PeerId,
    blob_store: Arc<dyn BlobStore>,
    transfers: DashMap<TransferId, Side>,
    queue: parking_lot::Mutex<TransferQueue>,
    chunk_bytes: usize,
    recommended_max_file_size: u64,
    events: mpsc::Sender<TransferEvent>,
}

impl TransferManager {
    pub fn new(self_id: PeerId, blob_store: Arc<dyn BlobStore>, chunk_bytes: usize, recommended_max_file_size: u64) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                self_id,
                blob_store,
                transfers: DashMap::new(),
                queue: parking_lot::Mutex::new(TransferQueue::new()),
                chunk_bytes,
                recommended_max_file_size,
                events: tx,
            },
            rx,
        )
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events.try_send(event);
    }

    /// `queue_send`: builds the sender-side manifest, admits it into the
    /// concurrency-capped queue, and returns its id immediately (spec
    /// §4.7.4 — at most 3 concurrent transfers, priority then FIFO).
    pub async fn queue_send(&self, peer_id: PeerId, path: &std::path::Path, priority: Priority, timestamp_ms: u64) -> Result<TransferId> {
        let blob = self.blob_store.open_outgoing(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidState("transfer path has no file name".into()))?
            .to_string();

        let transfer = SenderTransfer::new(
            peer_id,
            self.self_id,
            file_name,
            blob,
            priority,
            self.chunk_bytes,
            self.recommended_max_file_size,
            timestamp_ms,
        )
        .await?;

        let transfer_id = transfer.transfer_id;
        self.transfers.insert(transfer_id, Side::Outgoing(transfer));
        self.queue.lock().enqueue(transfer_id, priority);
        self.admit();
        Ok(transfer_id)
    }

    /// Promotes queued transfers into `Transferring` up to the concurrency
    /// cap, emitting `Started` for each one newly admitted.
    pub fn admit(&self) {
        let started = self.queue.lock().admit();
        for transfer_id in started {
            if let Some(mut entry) = self.transfers.get_mut(&transfer_id) {
                if let Side::Outgoing(sender) = &mut *entry {
                    sender.begin_transferring();
                    self.emit(TransferEvent::Started {
                        transfer_id,
                        peer_id: sender.peer_id,
                        direction: Direction::Outgoing,
                    });
                }
            }
        }
    }

    /// Handles an inbound `FILE_MANIFEST`: allocates receiver-side state and
    /// returns the initial empty ack to send back, per spec §4.7.2.
    pub async fn handle_manifest(&self, peer_id: PeerId, manifest: Manifest, timestamp_ms: u64) -> Result<Ack> {
        let file_id_str = manifest.file_id.to_string();
        let blob = self.blob_store.create_incoming(&file_id_str).await?;
        let transfer = ReceiverTransfer::new(peer_id, manifest, blob, self.chunk_bytes, self.recommended_max_file_size);
        let ack = transfer.initial_ack(timestamp_ms);
        let transfer_id = transfer.transfer_id;
        self.emit(TransferEvent::Started {
            transfer_id,
            peer_id,
            direction: Direction::Incoming,
        });
        self.transfers.insert(transfer_id, Side::Incoming(transfer));
        Ok(ack)
    }

    /// Handles an inbound `FILE_CHUNK`, returning the ack to send back. An
    /// unknown `file_id` is ignored, per §4.7.6.
    pub async fn handle_chunk(&self, transfer_id: TransferId, chunk: Chunk, timestamp_ms: u64) -> Result<Option<Ack>> {
        let Some(mut entry) = self.transfers.get_mut(&transfer_id) else {
            return Ok(None);
        };
        let Side::Incoming(receiver) = &mut *entry else {
            return Ok(None);
        };

        receiver.accept_chunk(&chunk).await?;
        let fraction = receiver.progress_fraction();
        self.emit(TransferEvent::Progress { transfer_id, fraction });

        let complete = receiver.is_complete();
        let ack = receiver.ack_for_current_state(timestamp_ms);

        if complete {
            match receiver.finalize().await {
                Ok(()) => {
                    self.queue.lock().complete(&transfer_id);
                    self.emit(TransferEvent::Completed { transfer_id });
                }
                Err(_) => {
                    self.queue.lock().complete(&transfer_id);
                    self.emit(TransferEvent::Failed {
                        transfer_id,
                        reason: FailureReason::Integrity,
                        retryable: FailureReason::Integrity.retryable(),
                    });
                }
            }
        }

        Ok(Some(ack))
    }

    /// Handles an inbound `FILE_ACK`: applies it to the sender-side state,
    /// returning the chunk indices that still need (re)sending.
    pub fn handle_ack(&self, transfer_id: TransferId, ack: &Ack) -> Vec<u32> {
        let Some(mut entry) = self.transfers.get_mut(&transfer_id) else {
            return Vec::new();
        };
        let Side::Outgoing(sender) = &mut *entry else {
            return Vec::new();
        };

        sender.apply_ack(&ack.completed, ack.transfer_complete);
        let fraction = sender.progress_fraction();
        self.emit(TransferEvent::Progress { transfer_id, fraction });

        if sender.status == TransferStatus::Completed {
            self.queue.lock().complete(&transfer_id);
            self.emit(TransferEvent::Completed { transfer_id });
            return Vec::new();
        }
        sender.pending_chunks()
    }

    /// Applies a retry schedule to an unacked chunk on an outgoing
    /// transfer; returns `None` once retries are exhausted (the transfer
    /// has already moved to `Failed{ChunkExhausted}`).
    pub fn schedule_retry(&self, transfer_id: TransferId, chunk_index: u32) -> Option<std::time::Duration> {
        let mut entry = self.transfers.get_mut(&transfer_id)?;
        let Side::Outgoing(sender) = &mut *entry else {
            return None;
        };
        let delay = sender.schedule_retry(chunk_index);
        if delay.is_none() {
            self.queue.lock().complete(&transfer_id);
            self.emit(TransferEvent::Failed {
                transfer_id,
                reason: FailureReason::ChunkExhausted,
                retryable: FailureReason::ChunkExhausted.retryable(),
            });
        }
        delay
    }

    pub fn pause(&self, transfer_id: &TransferId) {
        if let Some(mut entry) = self.transfers.get_mut(transfer_id) {
            match &mut *entry {
                Side::Outgoing(s) => s.pause(),
                Side::Incoming(r) => r.pause(),
            }
            self.emit(TransferEvent::Paused { transfer_id: *transfer_id });
        }
    }

    pub fn resume(&self, transfer_id: &TransferId) {
        if let Some(mut entry) = self.transfers.get_mut(transfer_id) {
            match &mut *entry {
                Side::Outgoing(s) => s.resume(),
                Side::Incoming(r) => r.resume(),
            }
            self.emit(TransferEvent::Resumed { transfer_id: *transfer_id });
        }
    }

    pub fn cancel(&self, transfer_id: &TransferId) {
        if let Some(mut entry) = self.transfers.get_mut(transfer_id) {
            match &mut *entry {
                Side::Outgoing(s) => s.cancel(),
                Side::Incoming(r) => r.cancel(),
            }
            self.queue.lock().complete(transfer_id);
        }
    }

    /// Pauses every active transfer with `peer_id` (§4.7.5 `PeerDisconnected`).
    pub fn on_peer_disconnected(&self, peer_id: &PeerId) {
        for mut entry in self.transfers.iter_mut() {
            let matches_peer = match &*entry {
                Side::Outgoing(s) => s.peer_id == *peer_id,
                Side::Incoming(r) => r.peer_id == *peer_id,
            };
            if matches_peer {
                match &mut *entry {
                    Side::Outgoing(s) => s.pause(),
                    Side::Incoming(r) => r.pause(),
                }
                warn!(peer = %peer_id, "paused transfer after peer disconnect");
            }
        }
    }

    /// Resumes `Paused` transfers with `peer_id` (§4.7.5 `PeerConnected`).
    pub fn on_peer_connected(&self, peer_id: &PeerId) {
        for mut entry in self.transfers.iter_mut() {
            let matches_peer = match &*entry {
                Side::Outgoing(s) => s.peer_id == *peer_id,
                Side::Incoming(r) => r.peer_id == *peer_id,
            };
            if matches_peer {
                match &mut *entry {
                    Side::Outgoing(s) => s.resume(),
                    Side::Incoming(r) => r.resume(),
                }
                info!(peer = %peer_id, "resumed transfer after peer reconnect");
            }
        }
        self.admit();
    }

    /// The manifest for an outgoing transfer, to send (or resend) as a
    /// `FILE_MANIFEST` frame.
    pub fn manifest_for(&self, transfer_id: &TransferId) -> Option<Manifest> {
        self.transfers.get(transfer_id).and_then(|e| match &*e {
            Side::Outgoing(s) => Some(s.manifest.clone()),
            Side::Incoming(_) => None,
        })
    }

    /// Every outgoing transfer currently `Transferring`, for the pacing loop
    /// to sweep each tick.
    pub fn outgoing_in_flight(&self) -> Vec<TransferId> {
        self.transfers
            .iter()
            .filter(|e| matches!(&*e, Side::Outgoing(s) if s.status == TransferStatus::Transferring))
            .map(|e| *e.key())
            .collect()
    }

    /// Reads and marks-sent the next never-transmitted chunk of
    /// `transfer_id`, if one remains.
    pub async fn next_chunk_to_send(&self, transfer_id: TransferId) -> Option<Result<Chunk>> {
        let mut entry = self.transfers.get_mut(&transfer_id)?;
        let Side::Outgoing(sender) = &mut *entry else {
            return None;
        };
        let index = sender.next_unsent()?;
        let chunk = sender.read_chunk(index).await;
        if chunk.is_ok() {
            sender.mark_sent(index);
        }
        Some(chunk)
    }

    /// Re-reads a specific chunk for retransmission; does not touch the
    /// `next_unsent` bookkeeping.
    pub async fn read_chunk(&self, transfer_id: TransferId, index: u32) -> Option<Result<Chunk>> {
        let entry = self.transfers.get(&transfer_id)?;
        let Side::Outgoing(sender) = &*entry else {
            return None;
        };
        Some(sender.read_chunk(index).await)
    }

    /// Moves every transfer tracked against `old` to `new`, so an in-flight
    /// transfer survives a mid-transfer peer-id rotation (spec §8).
    pub fn rotate_peer_id(&self, old: &PeerId, new: PeerId) {
        for mut entry in self.transfers.iter_mut() {
            match &mut *entry {
                Side::Outgoing(s) if s.peer_id == *old => s.peer_id = new,
                Side::Incoming(r) if r.peer_id == *old => r.peer_id = new,
                _ => {}
            }
        }
    }

    /// The remote peer a transfer is associated with, regardless of
    /// direction.
    pub fn peer_of(&self, transfer_id: &TransferId) -> Option<PeerId> {
        self.transfers.get(transfer_id).map(|e| match &*e {
            Side::Outgoing(s) => s.peer_id,
            Side::Incoming(r) => r.peer_id,
        })
    }

    pub fn status(&self, transfer_id: &TransferId) -> Option<TransferStatus> {
        self.transfers.get(transfer_id).map(|e| match &*e {
            Side::Outgoing(s) => s.status.clone(),
            Side::Incoming(r) => r.status.clone(),
        })
    }

    pub fn active_count(&self) -> usize {
        self.queue.lock().active_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FileBlobStore;

    fn peer(n: u8) -> PeerId {
        PeerId::from_hex(&format!("{n:012x}")).unwrap()
    }

    #[tokio::test]
    async fn admits_at_most_three_and_queues_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileBlobStore::new(dir.path()));
        let (manager, _rx) = TransferManager::new(peer(0), store, 480, 100 * 1024 * 1024);

        for i in 0..5u8 {
            let path = dir.path().join(format!("f{i}.bin"));
            std::fs::write(&path, vec![1u8; 10]).unwrap();
            manager.queue_send(peer(1), &path, Priority::Normal, 0).await.unwrap();
        }
        assert_eq!(manager.active_count(), 3);
    }
}
