//! Handshake, rekey, and version-negotiation payloads (frame types
//! `0x00`, `0x04`, `0x05`, `0x06`).

use std::io::Cursor;

use crate::error::{Error, Result};
use crate::protocol::binary::*;

/// Handshake / rekey-request / rekey-response payload: a raw 32-byte
/// X25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EphemeralKeyPayload {
    pub public_key: [u8; 32],
}

impl EphemeralKeyPayload {
    pub fn new(public_key: [u8; 32]) -> Self {
        Self { public_key }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.public_key.to_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != 32 {
            return Err(Error::Codec(format!(
                "ephemeral key payload must be 32 bytes, got {}",
                data.len()
            )));
        }
        let mut cur = Cursor::new(data);
        Ok(Self {
            public_key: read_array(&mut cur)?,
        })
    }
}

/// `{major, minor, patch}` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const CURRENT: Version = Version {
        major: 1,
        minor: 0,
        patch: 0,
    };

    /// Per spec §4.3.3: compatible iff majors match and the peer's minor is
    /// at least our minimum required minor.
    pub fn compatible_with(&self, ours: Version, our_min_minor: u8) -> bool {
        self.major == ours.major && self.minor >= our_min_minor
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![self.major, self.minor, self.patch]
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != 3 {
            return Err(Error::Codec(format!(
                "version payload must be 3 bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            major: data[0],
            minor: data[1],
            patch: data[2],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_key_round_trips() {
        let payload = EphemeralKeyPayload::new([7u8; 32]);
        let encoded = payload.encode();
        assert_eq!(EphemeralKeyPayload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn version_compatibility() {
        let ours = Version::CURRENT;
        let compatible = Version { major: 1, minor: 0, patch: 5 };
        let incompatible_major = Version { major: 2, minor: 0, patch: 0 };
        let incompatible_minor = Version { major: 1, minor: 0, patch: 0 };
        assert!(compatible.compatible_with(ours, 0));
        assert!(!incompatible_major.compatible_with(ours, 0));
        assert!(incompatible_minor.compatible_with(ours, 0));
        assert!(!incompatible_minor.compatible_with(ours, 1));
    }
}
