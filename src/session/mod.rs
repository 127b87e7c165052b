//! Session layer (C3): handshake, AEAD framing, rekeying, rate limiting,
//! version negotiation, and the authentication failure model.

pub mod rate_limit;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;
use x25519_dalek::PublicKey;

use crate::config::SessionConfig;
use crate::crypto::kdf::{self, HANDSHAKE_SALT, REKEY_SALT};
use crate::crypto::{AeadKey, EphemeralKeyPair};
use crate::error::{Error, Result};
use crate::identity::IdentityManager;
use crate::protocol::handshake::Version;
use crate::protocol::PeerId;
use rate_limit::SlidingWindowCounter;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Which side of the handshake opened the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Lifecycle state of a [`Session`], per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    HandshakeInFlight,
    Established,
    Closed,
}

/// One peer-to-peer secure channel.
pub struct Session {
    pub session_id: Uuid,
    pub peer_id: PeerId,
    pub role: Role,
    pub state: SessionState,
    ephemeral: EphemeralKeyPair,
    peer_ephemeral_pub: Option<PublicKey>,
    symmetric_key: Option<AeadKey>,
    previous_keys: VecDeque<AeadKey>,
    previous_keys_capacity: usize,
    pub send_counter: u64,
    recv_counter: Option<u64>,
    pub established_at_ms: Option<u64>,
    pub last_activity_ms: u64,
    pub rekey_epoch: u32,
    pub last_rekey_at: Instant,
    pub version: Option<Version>,
    handshake_started_at: Instant,
    pending_rekey: Option<EphemeralKeyPair>,
}

impl Session {
    fn new(peer_id: PeerId, role: Role, previous_keys_capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            session_id: Uuid::new_v4(),
            peer_id,
            role,
            state: SessionState::HandshakeInFlight,
            ephemeral: EphemeralKeyPair::generate(),
            peer_ephemeral_pub: None,
            symmetric_key: None,
            previous_keys: VecDeque::with_capacity(previous_keys_capacity),
            previous_keys_capacity,
            send_counter: 0,
            recv_counter: None,
            established_at_ms: None,
            last_activity_ms: now_ms(),
            rekey_epoch: 0,
            last_rekey_at: now,
            version: None,
            handshake_started_at: now,
            pending_rekey: None,
        }
    }

    pub fn our_ephemeral_public(&self) -> PublicKey {
        self.ephemeral.public()
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn handshake_elapsed(&self) -> Duration {
        self.handshake_started_at.elapsed()
    }

    fn establish(&mut self, peer_ephemeral_pub: PublicKey) -> Result<()> {
        let shared_secret = self.ephemeral.diffie_hellman(&peer_ephemeral_pub);
        let key_bytes = kdf::derive_session_key(&shared_secret, HANDSHAKE_SALT)?;
        self.peer_ephemeral_pub = Some(peer_ephemeral_pub);
        self.symmetric_key = Some(AeadKey::new(&key_bytes));
        self.state = SessionState::Established;
        self.established_at_ms = Some(now_ms());
        self.last_activity_ms = now_ms();
        Ok(())
    }

    /// Encrypt `plaintext` under the current key and advance `send_counter`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<(u64, Vec<u8>)> {
        let key = self
            .symmetric_key
            .as_ref()
            .ok_or_else(|| Error::InvalidState("session has no established key".into()))?;
        let counter = self.send_counter;
        let ciphertext = key.seal(counter, plaintext)?;
        self.send_counter += 1;
        self.last_activity_ms = now_ms();
        Ok((counter, ciphertext))
    }

    /// Decrypt `ciphertext` sealed under `counter`, trying the current key
    /// first and falling back through `previous_keys` (spec §4.3: messages
    /// sealed just before a rekey must still decrypt afterward).
    pub fn decrypt(&mut self, counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        // Spec §4.3 step 1: reject outright if counter <= recv_counter, before
        // even attempting to open under the current key. `recv_counter` is
        // `None` until the first message is accepted, so counter 0 is valid.
        if let Some(recv_counter) = self.recv_counter {
            if counter <= recv_counter {
                return Err(Error::Crypto(format!(
                    "replayed or reordered counter {counter} <= recv_counter {recv_counter}"
                )));
            }
        }
        if let Some(key) = &self.symmetric_key {
            if let Ok(pt) = key.open(counter, ciphertext) {
                self.recv_counter = Some(counter);
                self.last_activity_ms = now_ms();
                return Ok(pt);
            }
        }
        // Newest-first, per spec §4.3 step 3: a message sealed just before a
        // rekey is far more likely to match the most recently retired key.
        for key in self.previous_keys.iter().rev() {
            if let Ok(pt) = key.open(counter, ciphertext) {
                self.last_activity_ms = now_ms();
                return Ok(pt);
            }
        }
        Err(Error::Crypto("decryption failed under current and previous keys".into()))
    }

    /// Retires the current key into `previous_keys` and derives a fresh one
    /// from a freshly exchanged ephemeral pair (spec §4.3.1).
    fn rekey(&mut self, peer_new_ephemeral: PublicKey, our_new_ephemeral: EphemeralKeyPair) -> Result<()> {
        let shared = our_new_ephemeral.diffie_hellman(&peer_new_ephemeral);
        let key_bytes = kdf::derive_session_key(&shared, REKEY_SALT)?;

        if let Some(old) = self.symmetric_key.take() {
            if self.previous_keys.len() == self.previous_keys_capacity {
                self.previous_keys.pop_front();
            }
            self.previous_keys.push_back(old);
        }

        self.ephemeral = our_new_ephemeral;
        self.peer_ephemeral_pub = Some(peer_new_ephemeral);
        self.symmetric_key = Some(AeadKey::new(&key_bytes));
        self.send_counter = 0;
        self.recv_counter = None;
        self.rekey_epoch += 1;
        self.last_rekey_at = Instant::now();
        Ok(())
    }

    pub fn due_for_rekey(&self, interval: Duration) -> bool {
        self.is_established() && self.last_rekey_at.elapsed() >= interval
    }
}

/// Count of consecutive auth failures within the failure window, per peer.
struct FailureTracker {
    window: Duration,
    threshold: u32,
    events: VecDeque<Instant>,
}

impl FailureTracker {
    fn new(window: Duration, threshold: u32) -> Self {
        Self {
            window,
            threshold,
            events: VecDeque::new(),
        }
    }

    /// Records a failure and reports whether the peer has now tripped the
    /// 3-strikes threshold within the window.
    fn record(&mut self) -> bool {
        let now = Instant::now();
        while let Some(&front) = self.events.front() {
            if now.duration_since(front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.push_back(now);
        self.events.len() as u32 >= self.threshold
    }
}

/// Emitted by the session manager for the engine facade to surface as
/// public events (spec §4.8).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Established { peer_id: PeerId },
    Rekeyed { peer_id: PeerId, epoch: u32 },
    Closed { peer_id: PeerId, reason: String },
    AuthTornDown { peer_id: PeerId },
}

/// Owns every active [`Session`] plus the rate limiters and failure
/// counters that gate the handshake and rekey state machines.
pub struct SessionManager {
    identity: Arc<IdentityManager>,
    config: SessionConfig,
    sessions: RwLock<HashMap<PeerId, Session>>,
    handshake_limiters: RwLock<HashMap<PeerId, SlidingWindowCounter>>,
    message_limiters: RwLock<HashMap<PeerId, SlidingWindowCounter>>,
    failures: RwLock<HashMap<PeerId, FailureTracker>>,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(identity: Arc<IdentityManager>, config: SessionConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                identity,
                config,
                sessions: RwLock::new(HashMap::new()),
                handshake_limiters: RwLock::new(HashMap::new()),
                message_limiters: RwLock::new(HashMap::new()),
                failures: RwLock::new(HashMap::new()),
                events: tx,
            },
            rx,
        )
    }

    /// `initiate_handshake(peer_id)`: allocates an Initiator session and
    /// returns the ephemeral public key to send in the handshake frame.
    pub async fn initiate_handshake(&self, peer_id: PeerId) -> Result<PublicKey> {
        self.check_handshake_rate(peer_id).await?;
        let session = Session::new(peer_id, Role::Initiator, self.config.previous_keys_capacity);
        let public = session.our_ephemeral_public();
        self.sessions.write().await.insert(peer_id, session);
        Ok(public)
    }

    /// `handle_handshake(peer_id, their_ephemeral_pub)`: for a Responder,
    /// allocates the session and replies with our ephemeral public key;
    /// for an Initiator completing the round trip, derives the shared key.
    /// Returns `Some(our_ephemeral_pub)` when a reply frame must be sent.
    pub async fn handle_handshake(&self, peer_id: PeerId, their_ephemeral_pub: PublicKey) -> Result<Option<PublicKey>> {
        self.check_handshake_rate(peer_id).await?;
        let mut sessions = self.sessions.write().await;

        match sessions.get_mut(&peer_id) {
            Some(session) if session.role == Role::Initiator && !session.is_established() => {
                session.establish(their_ephemeral_pub)?;
                info!(peer = %peer_id, "session established as initiator");
                let _ = self.events.send(SessionEvent::Established { peer_id }).await;
                Ok(None)
            }
            // A ready session is never overwritten by a fresh handshake — a
            // peer that wants new key material has to go through rekey.
            Some(session) if session.is_established() => {
                warn!(peer = %peer_id, "ignoring handshake for a peer with an established session");
                Err(Error::InvalidState(format!("session with {peer_id} is already established")))
            }
            _ => {
                let mut session = Session::new(peer_id, Role::Responder, self.config.previous_keys_capacity);
                let our_public = session.our_ephemeral_public();
                session.establish(their_ephemeral_pub)?;
                sessions.insert(peer_id, session);
                info!(peer = %peer_id, "session established as responder");
                let _ = self.events.send(SessionEvent::Established { peer_id }).await;
                Ok(Some(our_public))
            }
        }
    }

    /// `should_timeout_handshake(peer_id)`: true once a half-open handshake
    /// has exceeded the configured timeout without reaching `Established`.
    pub async fn should_timeout_handshake(&self, peer_id: &PeerId) -> bool {
        match self.sessions.read().await.get(peer_id) {
            Some(session) => !session.is_established() && session.handshake_elapsed() >= self.config.handshake_timeout,
            None => false,
        }
    }

    pub async fn abandon_handshake(&self, peer_id: &PeerId) {
        self.sessions.write().await.remove(peer_id);
    }

    /// `encrypt_for(peer_id, plaintext)`.
    pub async fn encrypt_for(&self, peer_id: &PeerId, plaintext: &[u8]) -> Result<(u64, Vec<u8>)> {
        self.check_message_rate(*peer_id).await?;
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(peer_id)
            .ok_or_else(|| Error::SessionNotFound(peer_id.to_string()))?;
        session.encrypt(plaintext)
    }

    /// `decrypt_from(peer_id, counter, ciphertext)`. A decrypt failure
    /// counts as an auth strike; three strikes in the failure window tear
    /// the session down (spec §4.3.4).
    pub async fn decrypt_from(&self, peer_id: &PeerId, counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_message_rate(*peer_id).await?;
        let result = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(peer_id)
                .ok_or_else(|| Error::SessionNotFound(peer_id.to_string()))?;
            session.decrypt(counter, ciphertext)
        };

        if result.is_err() {
            let tripped = {
                let mut failures = self.failures.write().await;
                failures
                    .entry(*peer_id)
                    .or_insert_with(|| FailureTracker::new(self.config.auth_failure_window, self.config.auth_failure_threshold))
                    .record()
            };
            if tripped {
                warn!(peer = %peer_id, "auth failure threshold tripped, tearing session down");
                self.sessions.write().await.remove(peer_id);
                let _ = self.events.send(SessionEvent::AuthTornDown { peer_id: *peer_id }).await;
            }
        }
        result
    }

    /// `initiate_rekey(peer_id)`: generates our new ephemeral keypair for a
    /// rekey round, stashes it on the session, and returns its public half
    /// to send as `rekey_request`/`rekey_response`.
    pub async fn initiate_rekey(&self, peer_id: &PeerId) -> Result<PublicKey> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(peer_id)
            .ok_or_else(|| Error::SessionNotFound(peer_id.to_string()))?;
        let keypair = EphemeralKeyPair::generate();
        let public = keypair.public();
        session.pending_rekey = Some(keypair);
        Ok(public)
    }

    /// `complete_rekey(peer_id, peer_new_ephemeral)`: consumes the pending
    /// ephemeral keypair stashed by [`Self::initiate_rekey`] and derives the
    /// new session key from it and the peer's new ephemeral public key.
    pub async fn complete_rekey(&self, peer_id: &PeerId, peer_new_ephemeral: PublicKey) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(peer_id)
            .ok_or_else(|| Error::SessionNotFound(peer_id.to_string()))?;
        let our_new_ephemeral = session
            .pending_rekey
            .take()
            .ok_or_else(|| Error::InvalidState("rekey completed with no pending request".into()))?;
        session.rekey(peer_new_ephemeral, our_new_ephemeral)?;
        let epoch = session.rekey_epoch;
        drop(sessions);
        let _ = self.events.send(SessionEvent::Rekeyed { peer_id: *peer_id, epoch }).await;
        Ok(())
    }

    /// Sessions whose rekey interval has elapsed — the engine's rekey timer
    /// drains this list every tick (§4.3.1: 60s check, 5 min minimum
    /// interval enforced by `rekey_interval` itself being >= that value in
    /// a correctly configured engine).
    pub async fn due_for_rekey(&self) -> Vec<PeerId> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.due_for_rekey(self.config.rekey_min_interval))
            .map(|s| s.peer_id)
            .collect()
    }

    pub async fn idle_sessions(&self) -> Vec<PeerId> {
        let cutoff = now_ms().saturating_sub(self.config.session_idle_timeout.as_millis() as u64);
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_established() && s.last_activity_ms < cutoff)
            .map(|s| s.peer_id)
            .collect()
    }

    pub async fn close(&self, peer_id: &PeerId, reason: impl Into<String>) {
        self.sessions.write().await.remove(peer_id);
        let _ = self
            .events
            .send(SessionEvent::Closed { peer_id: *peer_id, reason: reason.into() })
            .await;
    }

    /// Moves a peer's session entry to its new rotated id, atomically,
    /// keeping the session (and its keys/counters) alive across the
    /// identifier change (spec §8's rotation property).
    pub async fn rotate_peer_id(&self, old: &PeerId, new: PeerId) {
        let mut sessions = self.sessions.write().await;
        if let Some(mut session) = sessions.remove(old) {
            session.peer_id = new;
            sessions.insert(new, session);
        }
    }

    pub async fn is_established(&self, peer_id: &PeerId) -> bool {
        self.sessions
            .read()
            .await
            .get(peer_id)
            .map(|s| s.is_established())
            .unwrap_or(false)
    }

    pub fn negotiate_version(&self, peer_version: Version) -> Result<Version> {
        if !peer_version.compatible_with(Version::CURRENT, 0) {
            return Err(Error::Handshake(format!(
                "incompatible protocol version: ours {:?}, theirs {:?}",
                Version::CURRENT,
                peer_version
            )));
        }
        Ok(Version::CURRENT)
    }

    /// `emergency_wipe()`: drops every session and all key material
    /// immediately, for the "compromise suspected" failure path.
    pub async fn emergency_wipe(&self) {
        self.sessions.write().await.clear();
        self.handshake_limiters.write().await.clear();
        self.message_limiters.write().await.clear();
        self.failures.write().await.clear();
        warn!("emergency wipe: all sessions and rate limiter state cleared");
    }

    async fn check_handshake_rate(&self, peer_id: PeerId) -> Result<()> {
        let mut limiters = self.handshake_limiters.write().await;
        let limiter = limiters
            .entry(peer_id)
            .or_insert_with(|| SlidingWindowCounter::new(Duration::from_secs(60), self.config.max_handshakes_per_minute));
        if limiter.record(Instant::now()) {
            Ok(())
        } else {
            Err(Error::RateLimit(format!("handshake rate exceeded for {peer_id}")))
        }
    }

    async fn check_message_rate(&self, peer_id: PeerId) -> Result<()> {
        let mut limiters = self.message_limiters.write().await;
        let limiter = limiters
            .entry(peer_id)
            .or_insert_with(|| SlidingWindowCounter::new(Duration::from_secs(60), self.config.max_messages_per_minute));
        if limiter.record(Instant::now()) {
            Ok(())
        } else {
            Err(Error::RateLimit(format!("message rate exceeded for {peer_id}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;

    async fn manager() -> (SessionManager, mpsc::Receiver<SessionEvent>) {
        let store: Arc<dyn crate::keystore::KeyStore> = Arc::new(MemoryKeyStore::new());
        let identity = Arc::new(IdentityManager::load_or_create(store).await.unwrap());
        SessionManager::new(identity, SessionConfig::default())
    }

    #[tokio::test]
    async fn handshake_establishes_session_on_both_ends() {
        let (initiator_mgr, _rx_a) = manager().await;
        let (responder_mgr, _rx_b) = manager().await;

        let peer_a = PeerId::from_hex("aaaaaaaaaaaa").unwrap();
        let peer_b = PeerId::from_hex("bbbbbbbbbbbb").unwrap();

        let initiator_ephemeral = initiator_mgr.initiate_handshake(peer_b).await.unwrap();
        let responder_reply = responder_mgr
            .handle_handshake(peer_a, initiator_ephemeral)
            .await
            .unwrap()
            .expect("responder must reply with its own ephemeral key");
        let follow_up = initiator_mgr.handle_handshake(peer_b, responder_reply).await.unwrap();
        assert!(follow_up.is_none());

        assert!(initiator_mgr.is_established(&peer_b).await);
        assert!(responder_mgr.is_established(&peer_a).await);
    }

    #[tokio::test]
    async fn handshake_rate_limit_trips() {
        let (mgr, _rx) = manager().await;
        let peer = PeerId::from_hex("cccccccccccc").unwrap();
        for _ in 0..SessionConfig::default().max_handshakes_per_minute {
            mgr.initiate_handshake(peer).await.unwrap();
        }
        assert!(mgr.initiate_handshake(peer).await.is_err());
    }

    /// A rekey mid-stream: a message sealed under the outgoing epoch just
    /// before the swap still decrypts afterward via `previous_keys`, and
    /// `rekey_epoch` advances on both sides.
    #[tokio::test]
    async fn message_crossing_rekey_boundary_still_decrypts() {
        let (initiator_mgr, _rx_a) = manager().await;
        let (responder_mgr, _rx_b) = manager().await;
        let peer_a = PeerId::from_hex("dddddddddddd").unwrap();
        let peer_b = PeerId::from_hex("eeeeeeeeeeee").unwrap();

        let initiator_ephemeral = initiator_mgr.initiate_handshake(peer_b).await.unwrap();
        let responder_reply = responder_mgr.handle_handshake(peer_a, initiator_ephemeral).await.unwrap().unwrap();
        initiator_mgr.handle_handshake(peer_b, responder_reply).await.unwrap();

        let (counter, ciphertext) = initiator_mgr.encrypt_for(&peer_b, b"before rekey").await.unwrap();

        let initiator_new = initiator_mgr.initiate_rekey(&peer_b).await.unwrap();
        let responder_new = responder_mgr.initiate_rekey(&peer_a).await.unwrap();
        responder_mgr.complete_rekey(&peer_a, initiator_new).await.unwrap();
        initiator_mgr.complete_rekey(&peer_b, responder_new).await.unwrap();

        let plaintext = responder_mgr.decrypt_from(&peer_a, counter, &ciphertext).await.unwrap();
        assert_eq!(plaintext, b"before rekey");

        let (counter, ciphertext) = initiator_mgr.encrypt_for(&peer_b, b"after rekey").await.unwrap();
        let plaintext = responder_mgr.decrypt_from(&peer_a, counter, &ciphertext).await.unwrap();
        assert_eq!(plaintext, b"after rekey");
    }
}
