//! Shared types for the transfer engine (C7): identifiers and the per-
//! transfer state machine shapes described in spec §4.7.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::protocol::{FileId, Manifest, PeerId};

/// Identifies one transfer. Generated at `queue_send` time and reused as
/// the manifest's `file_id` once the sender state machine builds it — the
/// spec does not distinguish the two identifier spaces, so this crate
/// keeps them numerically identical rather than inventing a mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<FileId> for TransferId {
    fn from(id: FileId) -> Self {
        Self(id.0)
    }
}

impl From<TransferId> for FileId {
    fn from(id: TransferId) -> Self {
        FileId(id.0)
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Integrity,
    ChunkExhausted,
    NoTransport,
}

impl FailureReason {
    pub fn retryable(self) -> bool {
        !matches!(self, FailureReason::NoTransport)
    }

    pub fn label(self) -> &'static str {
        match self {
            FailureReason::Integrity => "integrity",
            FailureReason::ChunkExhausted => "chunk exhausted",
            FailureReason::NoTransport => "no-transport",
        }
    }
}

/// Lifecycle state of a transfer, shared by sender and receiver sides
/// (which fields apply depends on direction; see [`super::sender::SenderTransfer`]
/// and [`super::receiver::ReceiverTransfer`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Queued,
    Preparing,
    Transferring,
    Paused { completed: usize },
    Completed,
    Cancelled,
    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Summary a completed/failed transfer reports to the facade.
#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub transfer_id: TransferId,
    pub peer_id: PeerId,
    pub direction: Direction,
    pub bytes: u64,
    pub duration_ms: u64,
}

/// Warnings attached to a transfer's status that don't block completion.
#[derive(Debug, Clone, Default)]
pub struct TransferWarnings {
    pub oversize: bool,
}

pub(super) fn chunks_by_index(chunks: &BTreeMap<u32, Vec<u8>>, total: u32) -> Option<Vec<u8>> {
    if chunks.len() as u32 != total {
        return None;
    }
    let mut out = Vec::new();
    for i in 0..total {
        out.extend_from_slice(chunks.get(&i)?);
    }
    Some(out)
}

pub(super) fn manifest_is_oversize(manifest: &Manifest, recommended_max: u64) -> bool {
    manifest.file_size > recommended_max
}
