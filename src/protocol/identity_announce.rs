//! `IDENTITY_ANNOUNCE` payload (frame type `0x02`), spec §3: broadcast when
//! a peer's rotating id changes, so the rest of the mesh can remap routing
//! state to the new id without a fresh handshake.

use std::io::Cursor;

use ed25519_dalek::Signature;

use crate::error::Result;
use crate::protocol::binary::*;
use crate::protocol::types::PeerId;

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityAnnouncement {
    pub old_peer_id: PeerId,
    pub new_peer_id: PeerId,
    pub long_term_public: [u8; 32],
    pub signature: [u8; 64],
}

impl IdentityAnnouncement {
    /// The bytes the signature covers: `old_peer_id || new_peer_id`, proving
    /// the same long-term key vouches for both identifiers.
    pub fn signed_bytes(old: &PeerId, new: &PeerId) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(old.as_wire_bytes());
        buf.extend_from_slice(new.as_wire_bytes());
        buf
    }

    pub fn signature(&self) -> Signature {
        Signature::from_bytes(&self.signature)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(24 + 32 + 64);
        write_bytes(&mut buf, self.old_peer_id.as_wire_bytes());
        write_bytes(&mut buf, self.new_peer_id.as_wire_bytes());
        write_bytes(&mut buf, &self.long_term_public);
        write_bytes(&mut buf, &self.signature);
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let old_peer_id = PeerId::from_wire_bytes(read_array(&mut cur)?)?;
        let new_peer_id = PeerId::from_wire_bytes(read_array(&mut cur)?)?;
        let long_term_public = read_array(&mut cur)?;
        let signature = read_array(&mut cur)?;
        Ok(Self {
            old_peer_id,
            new_peer_id,
            long_term_public,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::from_hex(&format!("{n:012x}")).unwrap()
    }

    #[test]
    fn round_trips() {
        let announcement = IdentityAnnouncement {
            old_peer_id: peer(1),
            new_peer_id: peer(2),
            long_term_public: [7u8; 32],
            signature: [9u8; 64],
        };
        let encoded = announcement.encode().unwrap();
        assert_eq!(IdentityAnnouncement::decode(&encoded).unwrap(), announcement);
    }
}
