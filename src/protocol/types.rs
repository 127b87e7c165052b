//! Typed wire identifiers, replacing the stringly-typed peer/file maps the
//! original implementation used.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::constants::PEER_ID_WIRE_LEN;

/// A rotating, 12-hex-character peer identifier.
///
/// Rendered on the wire as its literal ASCII bytes (not packed nibbles),
/// matching the ephemeral identity scheme in the specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; PEER_ID_WIRE_LEN]);

impl PeerId {
    /// Derive a peer id from a long-term and ephemeral public key, per
    /// spec §3: the 12-hex-character prefix of
    /// `SHA-256(long_term_public || current_ephemeral_public)`.
    pub fn derive(long_term_public: &[u8], ephemeral_public: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(long_term_public);
        hasher.update(ephemeral_public);
        let digest = hasher.finalize();
        let hex = hex::encode(digest);
        Self::from_hex(&hex[..PEER_ID_WIRE_LEN]).expect("hex prefix is always valid")
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != PEER_ID_WIRE_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::Codec(format!("invalid peer id: {s}")));
        }
        let mut bytes = [0u8; PEER_ID_WIRE_LEN];
        bytes.copy_from_slice(s.as_bytes());
        Ok(Self(bytes))
    }

    /// The broadcast sentinel recipient id (all-zero ASCII).
    pub fn broadcast() -> Self {
        Self(crate::protocol::constants::BROADCAST_SENTINEL)
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == crate::protocol::constants::BROADCAST_SENTINEL
    }

    pub fn as_wire_bytes(&self) -> &[u8; PEER_ID_WIRE_LEN] {
        &self.0
    }

    pub fn from_wire_bytes(bytes: [u8; PEER_ID_WIRE_LEN]) -> Result<Self> {
        if !bytes.iter().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::Codec("peer id is not hex-ascii".into()));
        }
        Ok(Self(bytes))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("constructor guarantees ascii hex")
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier for an in-flight or completed file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority of a queued transfer, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Urgent),
            other => Err(Error::Codec(format!("invalid priority: {other}"))),
        }
    }
}

/// Compression negotiated for a manifest's chunk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
    Gzip = 2,
}

impl Compression {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Gzip),
            other => Err(Error::Codec(format!("invalid compression tag: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_derivation_is_deterministic() {
        let a = PeerId::derive(b"long-term", b"ephemeral-1");
        let b = PeerId::derive(b"long-term", b"ephemeral-1");
        assert_eq!(a, b);
        let c = PeerId::derive(b"long-term", b"ephemeral-2");
        assert_ne!(a, c);
    }

    #[test]
    fn broadcast_sentinel_round_trips() {
        let id = PeerId::broadcast();
        assert!(id.is_broadcast());
        assert_eq!(id.as_str(), "000000000000");
    }
}
