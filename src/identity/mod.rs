//! Identity & key store (C2): the long-term keypair, the rotating peer id,
//! and the peer-id-to-fingerprint map.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ed25519_dalek::Signature;
use parking_lot::RwLock;
use rand::Rng;
use tracing::info;

use crate::crypto::keys::EphemeralKeyPair;
use crate::crypto::StaticIdentity;
use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::protocol::PeerId;

const LONG_TERM_KEY_ID: &str = "identity/long_term";
const ROTATION_HISTORY_CAPACITY: usize = 100;
const ROTATION_MIN: Duration = Duration::from_secs(5 * 60);
const ROTATION_MAX: Duration = Duration::from_secs(15 * 60);
const EMERGENCY_ROTATION_MIN: Duration = Duration::from_secs(60);
const EMERGENCY_ROTATION_MAX: Duration = Duration::from_secs(5 * 60);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct RotationState {
    ephemeral: EphemeralKeyPair,
    peer_id: PeerId,
    next_rotation_at_ms: u64,
    history: VecDeque<PeerId>,
}

/// Owns the long-term identity and the rotation schedule for the ephemeral
/// peer id, plus the peer_id → long_term_public and fingerprint → peer_id
/// indices required for routing.
pub struct IdentityManager {
    static_identity: StaticIdentity,
    rotation: RwLock<RotationState>,
    peer_longterm: RwLock<HashMap<PeerId, Vec<u8>>>,
    fingerprint_to_peer: RwLock<HashMap<String, PeerId>>,
}

/// Emitted by [`IdentityManager::rotate_peer_id`] so the facade can publish
/// a `PeerIdRotated` event without this module depending on the engine.
#[derive(Debug, Clone, Copy)]
pub struct PeerIdRotated {
    pub old: PeerId,
    pub new: PeerId,
}

impl IdentityManager {
    /// `load_or_create_identity()`: returns the persisted long-term keypair
    /// or generates and persists a fresh one.
    pub async fn load_or_create(keystore: Arc<dyn KeyStore>) -> Result<Self> {
        let static_identity = match keystore.load(LONG_TERM_KEY_ID).await? {
            Some(bytes) if bytes.len() == 64 => {
                let mut seed = [0u8; 64];
                seed.copy_from_slice(&bytes);
                StaticIdentity::from_seed(&seed)?
            }
            _ => {
                let identity = StaticIdentity::generate();
                keystore.save(LONG_TERM_KEY_ID, &identity.to_seed()).await?;
                identity
            }
        };

        let ephemeral = EphemeralKeyPair::generate();
        let peer_id = PeerId::derive(
            static_identity.dh_public().as_bytes(),
            ephemeral.public().as_bytes(),
        );
        let next_rotation_at_ms = now_ms() + random_duration(ROTATION_MIN, ROTATION_MAX).as_millis() as u64;

        Ok(Self {
            static_identity,
            rotation: RwLock::new(RotationState {
                ephemeral,
                peer_id,
                next_rotation_at_ms,
                history: VecDeque::with_capacity(ROTATION_HISTORY_CAPACITY),
            }),
            peer_longterm: RwLock::new(HashMap::new()),
            fingerprint_to_peer: RwLock::new(HashMap::new()),
        })
    }

    pub fn fingerprint(&self) -> String {
        self.static_identity.fingerprint()
    }

    /// Raw Ed25519 verifying key bytes, carried in `identity_announce` so a
    /// peer that has never seen us before can register our fingerprint.
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.static_identity.verifying_key().to_bytes()
    }

    pub fn current_peer_id(&self) -> PeerId {
        self.rotation.read().peer_id
    }

    pub fn due_for_rotation(&self) -> bool {
        now_ms() >= self.rotation.read().next_rotation_at_ms
    }

    /// Generates a new ephemeral key, computes the new identifier, appends
    /// the old identifier to the bounded history, and returns the rotation
    /// so the caller can emit `PeerIdRotated{old,new}` and atomically
    /// re-key routing/peer-capability tables.
    pub fn rotate_peer_id(&self) -> PeerIdRotated {
        self.rotate_with_window(ROTATION_MIN, ROTATION_MAX)
    }

    /// `emergency_rotate()`: collapses the rotation window to
    /// `[1 min, 5 min]` temporarily and rotates immediately.
    pub fn emergency_rotate(&self) -> PeerIdRotated {
        self.rotate_with_window(EMERGENCY_ROTATION_MIN, EMERGENCY_ROTATION_MAX)
    }

    fn rotate_with_window(&self, min: Duration, max: Duration) -> PeerIdRotated {
        let mut state = self.rotation.write();
        let old = state.peer_id;

        let ephemeral = EphemeralKeyPair::generate();
        let new = PeerId::derive(self.static_identity.dh_public().as_bytes(), ephemeral.public().as_bytes());

        if state.history.len() == ROTATION_HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back(old);

        state.ephemeral = ephemeral;
        state.peer_id = new;
        state.next_rotation_at_ms = now_ms() + random_duration(min, max).as_millis() as u64;

        info!(%old, %new, "peer id rotated");
        PeerIdRotated { old, new }
    }

    /// `map_peer(peer_id, long_term_public)`.
    pub fn map_peer(&self, peer_id: PeerId, long_term_public: Vec<u8>) {
        let fp = fingerprint_of(&long_term_public);
        self.peer_longterm.write().insert(peer_id, long_term_public);
        self.fingerprint_to_peer.write().insert(fp, peer_id);
    }

    /// `lookup_fingerprint(peer_id)`.
    pub fn lookup_fingerprint(&self, peer_id: &PeerId) -> Option<String> {
        self.peer_longterm
            .read()
            .get(peer_id)
            .map(|pk| fingerprint_of(pk))
    }

    /// `find_peer_by_fingerprint(fp)`.
    pub fn find_peer_by_fingerprint(&self, fingerprint: &str) -> Option<PeerId> {
        self.fingerprint_to_peer.read().get(fingerprint).copied()
    }

    /// Records that `old` has been superseded by `new` for the same
    /// long-term key, keeping the fingerprint index resolved to exactly
    /// one current id (spec §3: "after rotation the old id is considered
    /// known for routing for a bounded grace period").
    pub fn remap_peer_rotation(&self, old: PeerId, new: PeerId, long_term_public: Vec<u8>) {
        self.map_peer(new, long_term_public);
        let _ = old; // old id remains in peer_longterm for the grace period; callers prune via PEER_TTL.
    }

    pub fn sign(&self, data: &[u8]) -> Signature {
        self.static_identity.sign(data)
    }

    pub fn verify(&self, peer_id: &PeerId, data: &[u8], signature: &Signature) -> Result<()> {
        let long_term = self
            .peer_longterm
            .read()
            .get(peer_id)
            .cloned()
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(
            long_term
                .as_slice()
                .try_into()
                .map_err(|_| Error::Crypto("stored long-term key is not 32 bytes".into()))?,
        )
        .map_err(|e| Error::Crypto(e.to_string()))?;
        crate::crypto::keys::verify(&verifying_key, data, signature)
    }

    pub fn dh_public(&self) -> x25519_dalek::PublicKey {
        self.static_identity.dh_public()
    }

    pub fn ephemeral_public(&self) -> x25519_dalek::PublicKey {
        self.rotation.read().ephemeral.public()
    }

    pub fn diffie_hellman_with_ephemeral(&self, their_public: &x25519_dalek::PublicKey) -> [u8; 32] {
        self.rotation.read().ephemeral.diffie_hellman(their_public)
    }
}

fn fingerprint_of(public_key: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    hex::encode(hasher.finalize())
}

fn random_duration(min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::MemoryKeyStore;

    #[tokio::test]
    async fn load_or_create_persists_identity() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::new());
        let a = IdentityManager::load_or_create(store.clone()).await.unwrap();
        let b = IdentityManager::load_or_create(store).await.unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[tokio::test]
    async fn rotation_changes_peer_id_but_not_fingerprint() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::new());
        let mgr = IdentityManager::load_or_create(store).await.unwrap();
        let before = mgr.current_peer_id();
        let rotated = mgr.rotate_peer_id();
        assert_eq!(rotated.old, before);
        assert_ne!(mgr.current_peer_id(), before);
    }

    #[tokio::test]
    async fn sign_and_verify_round_trip() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::new());
        let mgr = IdentityManager::load_or_create(store).await.unwrap();
        let peer_id = mgr.current_peer_id();
        mgr.map_peer(peer_id, mgr.static_identity.verifying_key().to_bytes().to_vec());
        let sig = mgr.sign(b"hello");
        mgr.verify(&peer_id, b"hello", &sig).unwrap();
    }
}
