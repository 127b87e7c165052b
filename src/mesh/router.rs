//! Mesh router (C6): duplicate suppression, delivery-vs-forward decision,
//! and store-and-forward handoff, per spec §4.6.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::mesh::dedup::Deduplicator;
use crate::mesh::peer::{Peer, SignalQuality};
use crate::mesh::store_and_forward::StoreAndForward;
use crate::protocol::{Frame, FrameType, PeerId};
use crate::transport::radio::TransportKind;
use crate::transport::Dispatcher;

const DEDUP_WINDOW: Duration = Duration::from_secs(600);

/// What the router decided to do with an inbound frame.
pub enum RouteOutcome {
    /// Deliver locally (to the session or transfer layer).
    Deliver(Frame),
    /// Re-emit toward every known peer except the sender.
    Forward { frame: Frame, exclude: PeerId },
    /// Dropped: duplicate, expired TTL, or not addressed to us and not
    /// forwardable.
    Dropped,
}

fn is_persistable(frame_type: FrameType) -> bool {
    matches!(frame_type, FrameType::FileManifest | FrameType::FileChunk | FrameType::FileAck)
}

pub struct Router {
    self_id: Mutex<PeerId>,
    dedup: Mutex<Deduplicator>,
    store_and_forward: Mutex<StoreAndForward>,
    known_peers: Mutex<HashMap<PeerId, Peer>>,
    dispatcher: Arc<Dispatcher>,
    peer_ttl: Duration,
}

impl Router {
    pub fn new(self_id: PeerId, dispatcher: Arc<Dispatcher>, store_and_forward_capacity: usize, store_and_forward_retention: Duration) -> Self {
        Self::with_peer_ttl(self_id, dispatcher, store_and_forward_capacity, store_and_forward_retention, Duration::from_secs(120))
    }

    pub fn with_peer_ttl(
        self_id: PeerId,
        dispatcher: Arc<Dispatcher>,
        store_and_forward_capacity: usize,
        store_and_forward_retention: Duration,
        peer_ttl: Duration,
    ) -> Self {
        Self {
            self_id: Mutex::new(self_id),
            dedup: Mutex::new(Deduplicator::new(DEDUP_WINDOW)),
            store_and_forward: Mutex::new(StoreAndForward::new(store_and_forward_capacity, store_and_forward_retention)),
            known_peers: Mutex::new(HashMap::new()),
            dispatcher,
            peer_ttl,
        }
    }

    /// Records (or refreshes) a peer sighting with its current link quality
    /// and advertised transports, per spec's `Peer record`.
    pub fn note_peer_seen(&self, peer_id: PeerId, link_quality: f32, supported_transports: Vec<TransportKind>, now_ms: u64) {
        let mut peers = self.known_peers.lock();
        let entry = peers.entry(peer_id).or_insert_with(|| Peer {
            peer_id,
            nickname: None,
            supported_transports: Vec::new(),
            last_seen_ms: now_ms,
            signal_quality: SignalQuality::from_link_quality(link_quality),
            long_term_public: None,
        });
        entry.last_seen_ms = now_ms;
        entry.signal_quality = SignalQuality::from_link_quality(link_quality);
        if !supported_transports.is_empty() {
            entry.supported_transports = supported_transports;
        }
    }

    pub fn set_nickname(&self, peer_id: &PeerId, nickname: String) {
        if let Some(peer) = self.known_peers.lock().get_mut(peer_id) {
            peer.nickname = Some(nickname);
        }
    }

    pub fn set_long_term_public(&self, peer_id: &PeerId, long_term_public: Vec<u8>) {
        if let Some(peer) = self.known_peers.lock().get_mut(peer_id) {
            peer.long_term_public = Some(long_term_public);
        }
    }

    pub fn note_peer_lost(&self, peer_id: &PeerId) {
        self.known_peers.lock().remove(peer_id);
    }

    pub fn self_id(&self) -> PeerId {
        *self.self_id.lock()
    }

    /// Updates our own id after a rotation; routing decisions (`is_for`
    /// checks, `peers_snapshot` self-exclusion) use this from then on.
    pub fn rotate_self_id(&self, new: PeerId) {
        *self.self_id.lock() = new;
    }

    /// Moves a remote peer's known-peer entry to its new rotated id,
    /// preserving its signal/transport/fingerprint data (spec §8: "B's
    /// routing table updates atomically").
    pub fn rotate_peer(&self, old: &PeerId, new: PeerId) {
        let mut peers = self.known_peers.lock();
        if let Some(mut peer) = peers.remove(old) {
            peer.peer_id = new;
            peers.insert(new, peer);
        }
    }

    /// Drops every peer whose `last_seen` has exceeded `PEER_TTL`, per
    /// spec's "Peer records live while `now - last_seen < PEER_TTL`".
    pub fn evict_expired_peers(&self, now_ms: u64) {
        self.known_peers.lock().retain(|_, peer| !peer.is_expired(now_ms, self.peer_ttl));
    }

    pub fn known_peers_except(&self, exclude: &PeerId) -> Vec<PeerId> {
        self.known_peers.lock().keys().filter(|p| *p != exclude).copied().collect()
    }

    /// Snapshot of every known peer (minus ourselves), evicting anything
    /// past `PEER_TTL` first.
    pub fn peers_snapshot(&self, now_ms: u64) -> Vec<Peer> {
        self.evict_expired_peers(now_ms);
        self.known_peers
            .lock()
            .values()
            .filter(|p| p.peer_id != self.self_id())
            .cloned()
            .collect()
    }

    /// Implements spec §4.6 steps 1-3 for a frame arriving from the radio.
    pub fn route_inbound(&self, sender_id: PeerId, mut frame: Frame) -> RouteOutcome {
        if self.dedup.lock().is_duplicate(sender_id, frame.timestamp_ms) {
            trace!(sender = %sender_id, "dropping duplicate frame");
            return RouteOutcome::Dropped;
        }

        if frame.is_for(&self.self_id()) {
            return RouteOutcome::Deliver(frame);
        }

        if frame.ttl > 1 {
            frame.ttl -= 1;
            return RouteOutcome::Forward { frame, exclude: sender_id };
        }

        trace!(sender = %sender_id, "ttl exhausted, dropping");
        RouteOutcome::Dropped
    }

    /// Queues `frame` for `destination` when no peer is currently reachable
    /// and the frame type is persistable.
    pub fn hold_for_unreachable_peer(&self, destination: PeerId, frame: Frame) -> Result<()> {
        if is_persistable(frame.frame_type) {
            self.store_and_forward.lock().enqueue(destination, frame)?;
        }
        Ok(())
    }

    /// Called when `peer_id` reappears: returns every frame queued for it.
    pub fn drain_store_and_forward(&self, peer_id: &PeerId) -> Vec<Frame> {
        self.store_and_forward.lock().drain(peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameType;

    fn peer(n: u8) -> PeerId {
        PeerId::from_hex(&format!("{n:012x}")).unwrap()
    }

    fn router() -> Router {
        Router::new(peer(0), Arc::new(Dispatcher::new()), 50, Duration::from_secs(3600 * 24))
    }

    #[test]
    fn ttl_one_frame_not_addressed_to_us_is_dropped() {
        let router = router();
        let frame = Frame::new(FrameType::FileChunk, 1, peer(1), Some(peer(2)), 0, vec![]);
        assert!(matches!(router.route_inbound(peer(1), frame), RouteOutcome::Dropped));
    }

    #[test]
    fn frame_addressed_to_us_is_delivered() {
        let router = router();
        let frame = Frame::new(FrameType::FileChunk, 2, peer(1), Some(peer(0)), 0, vec![]);
        assert!(matches!(router.route_inbound(peer(1), frame), RouteOutcome::Deliver(_)));
    }

    #[test]
    fn frame_for_other_peer_is_forwarded_with_decremented_ttl() {
        let router = router();
        let frame = Frame::new(FrameType::FileChunk, 3, peer(1), Some(peer(2)), 0, vec![]);
        match router.route_inbound(peer(1), frame) {
            RouteOutcome::Forward { frame, exclude } => {
                assert_eq!(frame.ttl, 2);
                assert_eq!(exclude, peer(1));
            }
            _ => panic!("expected forward"),
        }
    }

    #[test]
    fn duplicate_is_dropped() {
        let router = router();
        let frame = Frame::new(FrameType::FileChunk, 5, peer(1), Some(peer(0)), 42, vec![]);
        let _ = router.route_inbound(peer(1), frame.clone());
        assert!(matches!(router.route_inbound(peer(1), frame), RouteOutcome::Dropped));
    }
}
