//! The externally observed event stream (C8), spec §4.8.

use crate::protocol::PeerId;
use crate::transfer::{FailureReason, TransferId};

/// Everything `Engine::observe()` can emit. One bounded `tokio::sync::mpsc`
/// channel carries all of these; `Engine::observe()` hands out the receiver
/// half (single-consumer — callers that need fan-out wrap it themselves).
#[derive(Debug, Clone)]
pub enum Event {
    TransferEnqueued { transfer_id: TransferId, peer_id: PeerId },
    TransferStarted { transfer_id: TransferId, peer_id: PeerId },
    TransferProgress { transfer_id: TransferId, fraction: f32 },
    TransferPaused { transfer_id: TransferId },
    TransferResumed { transfer_id: TransferId },
    TransferCompleted { transfer_id: TransferId, sink: String },
    TransferFailed { transfer_id: TransferId, reason: FailureReason, retryable: bool },
    PeerDiscovered { peer_id: PeerId },
    PeerLost { peer_id: PeerId },
    PeerAuthenticated { peer_id: PeerId },
    SessionEstablished { peer_id: PeerId },
    SessionExpired { peer_id: PeerId },
    RekeyComplete { peer_id: PeerId, epoch: u32 },
    PeerIdRotated { old: PeerId, new: PeerId },
}
