//! Receiver-side transfer state machine, spec §4.7.2 and the edge cases in
//! §4.7.6 (duplicate chunks, zero-size files, oversize files).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::blob::Blob;
use crate::error::Result;
use crate::protocol::ack::Ack;
use crate::protocol::chunk::Chunk;
use crate::protocol::manifest::Manifest;
use crate::protocol::types::PeerId;
use crate::transfer::state::{manifest_is_oversize, Direction, FailureReason, TransferId, TransferStatus, TransferWarnings};

pub struct ReceiverTransfer {
    pub transfer_id: TransferId,
    pub peer_id: PeerId,
    pub manifest: Manifest,
    pub status: TransferStatus,
    pub warnings: TransferWarnings,
    blob: Arc<dyn Blob>,
    chunk_bytes: usize,
    received_hashes: BTreeMap<u32, [u8; 32]>,
}

impl ReceiverTransfer {
    pub fn new(peer_id: PeerId, manifest: Manifest, blob: Arc<dyn Blob>, chunk_bytes: usize, recommended_max_file_size: u64) -> Self {
        let oversize = manifest_is_oversize(&manifest, recommended_max_file_size);
        let status = if manifest.total_chunks == 0 {
            TransferStatus::Completed
        } else {
            TransferStatus::Transferring
        };
        Self {
            transfer_id: manifest.file_id.into(),
            peer_id,
            manifest,
            status,
            warnings: TransferWarnings { oversize },
            blob,
            chunk_bytes,
            received_hashes: BTreeMap::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::Incoming
    }

    /// Initial empty ack sent the moment the manifest is accepted, per
    /// spec §4.7.2.
    pub fn initial_ack(&self, timestamp_ms: u64) -> Ack {
        Ack::new(self.manifest.file_id, self.peer_id, BTreeSet::new(), self.manifest.total_chunks, timestamp_ms)
    }

    /// Verifies and stores a chunk. Per §4.7.6: a duplicate with a matching
    /// hash is silently accepted and re-acked; a duplicate with a
    /// *different* hash is dropped, keeping the first-received copy.
    /// Chunks for an index outside `total_chunks` are ignored.
    pub async fn accept_chunk(&mut self, chunk: &Chunk) -> Result<bool> {
        if chunk.chunk_index >= self.manifest.total_chunks {
            return Ok(false);
        }
        if let Some(existing_hash) = self.received_hashes.get(&chunk.chunk_index) {
            return Ok(*existing_hash == chunk.chunk_hash);
        }
        if !chunk.verify_hash() {
            return Ok(false);
        }

        let plaintext = crate::transfer::compression::decompress(self.manifest.compression, &chunk.payload)?;
        let offset = chunk.chunk_index as u64 * self.chunk_bytes as u64;
        self.blob.write_at(offset, &plaintext).await?;
        self.received_hashes.insert(chunk.chunk_index, chunk.chunk_hash);
        Ok(true)
    }

    pub fn completed_indices(&self) -> BTreeSet<u32> {
        self.received_hashes.keys().copied().collect()
    }

    pub fn is_complete(&self) -> bool {
        self.received_hashes.len() as u32 == self.manifest.total_chunks
    }

    pub fn ack_for_current_state(&self, timestamp_ms: u64) -> Ack {
        Ack::new(self.manifest.file_id, self.peer_id, self.completed_indices(), self.manifest.total_chunks, timestamp_ms)
    }

    /// Reassembles every chunk in order and verifies the whole-file hash
    /// from the manifest, finalizing the blob on success.
    pub async fn finalize(&mut self) -> Result<()> {
        if !self.is_complete() {
            return Err(crate::error::Error::InvalidState("transfer is not complete".into()));
        }

        let mut hasher = Sha256::new();
        let mut offset = 0u64;
        for index in 0..self.manifest.total_chunks {
            let remaining = self.manifest.file_size.saturating_sub(offset);
            let len = remaining.min(self.chunk_bytes as u64) as usize;
            let bytes = self.blob.read_at(offset, len).await?;
            hasher.update(&bytes);
            offset += len as u64;
            let _ = index;
        }
        let actual: [u8; 32] = hasher.finalize().into();

        if actual != self.manifest.sha256 {
            self.status = TransferStatus::Failed {
                reason: FailureReason::Integrity,
            };
            return Err(crate::error::Error::Integrity(format!(
                "whole-file hash mismatch for {}",
                self.manifest.file_id
            )));
        }

        self.blob.finalize(&self.manifest.file_name).await?;
        self.status = TransferStatus::Completed;
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.status = TransferStatus::Cancelled;
    }

    pub fn pause(&mut self) {
        if matches!(self.status, TransferStatus::Transferring) {
            self.status = TransferStatus::Paused {
                completed: self.received_hashes.len(),
            };
        }
    }

    pub fn resume(&mut self) {
        if matches!(self.status, TransferStatus::Paused { .. }) {
            self.status = TransferStatus::Transferring;
        }
    }

    pub fn progress_fraction(&self) -> f32 {
        if self.manifest.total_chunks == 0 {
            return 1.0;
        }
        self.received_hashes.len() as f32 / self.manifest.total_chunks as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlob;
    use crate::protocol::types::{FileId, Priority};

    fn peer(n: u8) -> PeerId {
        PeerId::from_hex(&format!("{n:012x}")).unwrap()
    }

    fn manifest(total_chunks: u32, file_size: u64, sha256: [u8; 32]) -> Manifest {
        Manifest {
            file_id: FileId::new(),
            file_name: "f.bin".into(),
            file_size,
            total_chunks,
            sha256,
            sender_id: peer(1),
            timestamp_ms: 0,
            priority: Priority::Normal,
            compression: None,
            chunk_hashes: None,
        }
    }

    #[tokio::test]
    async fn duplicate_chunk_with_same_hash_is_accepted() {
        let data = vec![5u8; 10];
        let sha = {
            let mut h = Sha256::new();
            h.update(&data);
            h.finalize().into()
        };
        let m = manifest(1, 10, sha);
        let blob = Arc::new(MemoryBlob::new());
        let mut transfer = ReceiverTransfer::new(peer(2), m.clone(), blob, 480, 100 * 1024 * 1024);
        let chunk = Chunk::new(m.file_id, 0, true, data);
        assert!(transfer.accept_chunk(&chunk).await.unwrap());
        assert!(transfer.accept_chunk(&chunk).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_chunk_with_different_hash_is_dropped() {
        let m = manifest(1, 10, [0u8; 32]);
        let blob = Arc::new(MemoryBlob::new());
        let mut transfer = ReceiverTransfer::new(peer(2), m.clone(), blob, 480, 100 * 1024 * 1024);
        let first = Chunk::new(m.file_id, 0, true, vec![1u8; 10]);
        assert!(transfer.accept_chunk(&first).await.unwrap());
        let conflicting = Chunk::new(m.file_id, 0, true, vec![2u8; 10]);
        assert!(!transfer.accept_chunk(&conflicting).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_chunk_index_is_ignored() {
        let m = manifest(1, 10, [0u8; 32]);
        let blob = Arc::new(MemoryBlob::new());
        let mut transfer = ReceiverTransfer::new(peer(2), m.clone(), blob, 480, 100 * 1024 * 1024);
        let chunk = Chunk::new(m.file_id, 5, true, vec![0u8; 10]);
        assert!(!transfer.accept_chunk(&chunk).await.unwrap());
    }

    #[tokio::test]
    async fn finalize_detects_integrity_mismatch() {
        let m = manifest(1, 3, [9u8; 32]);
        let blob = Arc::new(MemoryBlob::new());
        let mut transfer = ReceiverTransfer::new(peer(2), m.clone(), blob, 480, 100 * 1024 * 1024);
        let chunk = Chunk::new(m.file_id, 0, true, vec![1, 2, 3]);
        transfer.accept_chunk(&chunk).await.unwrap();
        let result = transfer.finalize().await;
        assert!(result.is_err());
        assert_eq!(transfer.status, TransferStatus::Failed { reason: FailureReason::Integrity });
    }

    #[test]
    fn oversize_manifest_flags_warning() {
        let m = manifest(1, 200, [0u8; 32]);
        let blob = Arc::new(MemoryBlob::new());
        let transfer = ReceiverTransfer::new(peer(2), m, blob, 480, 100);
        assert!(transfer.warnings.oversize);
    }
}
