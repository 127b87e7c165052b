//! Sender-side transfer state machine, spec §4.7.1.
//!
//! `Queued` → `Preparing` (builds the manifest, waits out the grace period
//! so the receiver has time to allocate state) → `Transferring` (paced
//! chunk emission, retransmits whatever an `Ack` reports missing) →
//! `Completed` | `Cancelled` | `Failed`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::protocol::chunk::Chunk;
use crate::protocol::manifest::{total_chunks, Manifest};
use crate::protocol::types::{FileId, PeerId, Priority};
use crate::transfer::retry::RetryCounters;
use crate::transfer::state::{manifest_is_oversize, Direction, FailureReason, TransferId, TransferStatus};

pub struct SenderTransfer {
    pub transfer_id: TransferId,
    pub peer_id: PeerId,
    pub manifest: Manifest,
    pub status: TransferStatus,
    blob: Arc<dyn Blob>,
    chunk_bytes: usize,
    acked: BTreeSet<u32>,
    sent: BTreeSet<u32>,
    retries: RetryCounters,
}

impl SenderTransfer {
    /// Builds the manifest for an outgoing file and moves straight to
    /// `Preparing`. `recommended_max_file_size` only produces a local
    /// rejection (spec §4.7.6); it never silently truncates the file.
    pub async fn new(
        peer_id: PeerId,
        sender_id: PeerId,
        file_name: String,
        blob: Arc<dyn Blob>,
        priority: Priority,
        chunk_bytes: usize,
        recommended_max_file_size: u64,
        timestamp_ms: u64,
    ) -> Result<Self> {
        let file_size = blob.len().await?;
        if file_size > recommended_max_file_size {
            return Err(Error::Capacity(format!(
                "file {file_name} is {file_size} bytes, exceeds recommended max {recommended_max_file_size}"
            )));
        }

        let chunks = total_chunks(file_size, chunk_bytes);
        let sha256 = whole_file_hash(blob.as_ref(), file_size).await?;
        let file_id = FileId::new();
        let manifest = Manifest {
            file_id,
            file_name,
            file_size,
            total_chunks: chunks,
            sha256,
            sender_id,
            timestamp_ms,
            priority,
            compression: crate::transfer::compression::choose_for_file_size(file_size),
            chunk_hashes: None,
        };

        let status = if chunks == 0 {
            TransferStatus::Completed
        } else {
            TransferStatus::Preparing
        };

        Ok(Self {
            transfer_id: file_id.into(),
            peer_id,
            manifest,
            status,
            blob,
            chunk_bytes,
            acked: BTreeSet::new(),
            sent: BTreeSet::new(),
            retries: RetryCounters::new(),
        })
    }

    pub fn direction(&self) -> Direction {
        Direction::Outgoing
    }

    pub fn begin_transferring(&mut self) {
        if self.status == TransferStatus::Preparing {
            self.status = TransferStatus::Transferring;
        }
    }

    /// Reads chunk `index` off the backing blob, compresses it per the
    /// manifest's negotiated scheme, and wraps it for the wire.
    pub async fn read_chunk(&self, index: u32) -> Result<Chunk> {
        let offset = index as u64 * self.chunk_bytes as u64;
        let remaining = self.manifest.file_size.saturating_sub(offset);
        let len = remaining.min(self.chunk_bytes as u64) as usize;
        let payload = self.blob.read_at(offset, len).await?;
        let payload = crate::transfer::compression::compress(self.manifest.compression, &payload)?;
        let is_last = index + 1 == self.manifest.total_chunks;
        Ok(Chunk::new(self.manifest.file_id, index, is_last, payload))
    }

    /// Every chunk index not yet acknowledged, in order.
    pub fn pending_chunks(&self) -> Vec<u32> {
        (0..self.manifest.total_chunks)
            .filter(|i| !self.acked.contains(i))
            .collect()
    }

    /// The lowest-indexed chunk never yet transmitted, if any remain.
    pub fn next_unsent(&self) -> Option<u32> {
        (0..self.manifest.total_chunks).find(|i| !self.sent.contains(i))
    }

    pub fn mark_sent(&mut self, index: u32) {
        self.sent.insert(index);
    }

    /// Applies an inbound `Ack`, updating acked state and completion.
    pub fn apply_ack(&mut self, acked: &BTreeSet<u32>, transfer_complete: bool) {
        self.acked.extend(acked.iter().copied());
        for i in acked {
            self.retries.clear(*i);
        }
        if transfer_complete || self.acked.len() as u32 == self.manifest.total_chunks {
            self.status = TransferStatus::Completed;
        }
    }

    /// Schedules a retry for an unacked chunk; `None` means retries are
    /// exhausted and the transfer should fail with `ChunkExhausted`.
    pub fn schedule_retry(&mut self, chunk_index: u32) -> Option<Duration> {
        match self.retries.schedule_retry(chunk_index) {
            Some(delay) => Some(delay),
            None => {
                self.status = TransferStatus::Failed {
                    reason: FailureReason::ChunkExhausted,
                };
                None
            }
        }
    }

    pub fn pause(&mut self) {
        if matches!(self.status, TransferStatus::Transferring) {
            self.status = TransferStatus::Paused {
                completed: self.acked.len(),
            };
        }
    }

    pub fn resume(&mut self) {
        if matches!(self.status, TransferStatus::Paused { .. }) {
            self.status = TransferStatus::Transferring;
        }
    }

    pub fn cancel(&mut self) {
        self.status = TransferStatus::Cancelled;
    }

    pub fn fail(&mut self, reason: FailureReason) {
        self.status = TransferStatus::Failed { reason };
    }

    pub fn progress_fraction(&self) -> f32 {
        if self.manifest.total_chunks == 0 {
            return 1.0;
        }
        self.acked.len() as f32 / self.manifest.total_chunks as f32
    }
}

async fn whole_file_hash(blob: &dyn Blob, file_size: u64) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    const READ_WINDOW: u64 = 1 << 20;
    let mut offset = 0u64;
    while offset < file_size {
        let len = (file_size - offset).min(READ_WINDOW) as usize;
        let bytes = blob.read_at(offset, len).await?;
        hasher.update(&bytes);
        offset += len as u64;
    }
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlob;

    fn peer(n: u8) -> PeerId {
        PeerId::from_hex(&format!("{n:012x}")).unwrap()
    }

    async fn blob_with(data: &[u8]) -> Arc<dyn Blob> {
        let blob = MemoryBlob::new();
        blob.write_at(0, data).await.unwrap();
        Arc::new(blob)
    }

    #[tokio::test]
    async fn empty_file_completes_immediately() {
        let blob = blob_with(&[]).await;
        let transfer = SenderTransfer::new(peer(1), peer(0), "empty.bin".into(), blob, Priority::Normal, 480, 100 * 1024 * 1024, 0)
            .await
            .unwrap();
        assert_eq!(transfer.manifest.total_chunks, 0);
        assert_eq!(transfer.status, TransferStatus::Completed);
    }

    #[tokio::test]
    async fn oversize_file_is_rejected_locally() {
        let blob = blob_with(&vec![0u8; 2000]).await;
        let result = SenderTransfer::new(peer(1), peer(0), "big.bin".into(), blob, Priority::Normal, 480, 1000, 0).await;
        assert!(matches!(result, Err(Error::Capacity(_))));
    }

    #[tokio::test]
    async fn full_ack_completes_transfer() {
        let blob = blob_with(&vec![7u8; 1000]).await;
        let mut transfer = SenderTransfer::new(peer(1), peer(0), "f.bin".into(), blob, Priority::Normal, 480, 100 * 1024 * 1024, 0)
            .await
            .unwrap();
        transfer.begin_transferring();
        let total = transfer.manifest.total_chunks;
        transfer.apply_ack(&(0..total).collect(), true);
        assert_eq!(transfer.status, TransferStatus::Completed);
    }
}
