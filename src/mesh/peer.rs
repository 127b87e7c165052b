//! The `Peer record` a host application sees through [`crate::engine::Engine::peers`],
//! per spec's `{peer_id, nickname, supported_transports, last_seen,
//! signal_quality, long_term_public?}`.

use std::time::Duration;

use crate::protocol::PeerId;
use crate::transport::radio::TransportKind;

/// Coarse link-quality bucket, derived from a radio's raw `link_quality`
/// (0.0-1.0) reading at `PeerDiscovered`/`FrameReceived` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl SignalQuality {
    pub fn from_link_quality(link_quality: f32) -> Self {
        if link_quality >= 0.85 {
            SignalQuality::Excellent
        } else if link_quality >= 0.6 {
            SignalQuality::Good
        } else if link_quality >= 0.3 {
            SignalQuality::Fair
        } else {
            SignalQuality::Poor
        }
    }
}

#[derive(Debug, Clone)]
pub struct Peer {
    pub peer_id: PeerId,
    pub nickname: Option<String>,
    pub supported_transports: Vec<TransportKind>,
    pub last_seen_ms: u64,
    pub signal_quality: SignalQuality,
    pub long_term_public: Option<Vec<u8>>,
}

impl Peer {
    pub fn is_expired(&self, now_ms: u64, peer_ttl: Duration) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) >= peer_ttl.as_millis() as u64
    }
}
