//! `ENCRYPTED` payload (frame type `0x01`): a session-sealed wrapper around
//! another frame's payload. The first byte names the inner frame type so the
//! receiver knows what to decode once the session layer has authenticated
//! and opened the ciphertext.

use std::io::Cursor;

use crate::error::Result;
use crate::protocol::binary::*;
use crate::protocol::frame::FrameType;

#[derive(Debug, Clone)]
pub struct EncryptedEnvelope {
    pub inner_type: FrameType,
    pub counter: u64,
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(9 + self.ciphertext.len());
        write_u8(&mut buf, self.inner_type.wire_value())?;
        write_u64(&mut buf, self.counter)?;
        write_bytes(&mut buf, &self.ciphertext);
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let inner_type = FrameType::from_wire(read_u8(&mut cur)?)?;
        let counter = read_u64(&mut cur)?;
        let ciphertext = read_exact(&mut cur, data.len() - cur.position() as usize)?;
        Ok(Self { inner_type, counter, ciphertext })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let envelope = EncryptedEnvelope {
            inner_type: FrameType::FileChunk,
            counter: 7,
            ciphertext: vec![1, 2, 3, 4],
        };
        let encoded = envelope.encode().unwrap();
        let decoded = EncryptedEnvelope::decode(&encoded).unwrap();
        assert_eq!(decoded.inner_type, FrameType::FileChunk);
        assert_eq!(decoded.counter, 7);
        assert_eq!(decoded.ciphertext, vec![1, 2, 3, 4]);
    }
}
