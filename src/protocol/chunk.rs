//! `FILE_CHUNK` payload (frame type `0x0E`).

use std::io::Cursor;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::protocol::binary::*;
use crate::protocol::types::FileId;

const FLAG_IS_LAST: u8 = 0x01;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub file_id: FileId,
    pub chunk_index: u32,
    pub chunk_hash: [u8; 32],
    pub is_last: bool,
    pub payload: Vec<u8>,
}

impl Chunk {
    pub fn new(file_id: FileId, chunk_index: u32, is_last: bool, payload: Vec<u8>) -> Self {
        let chunk_hash = hash_payload(&payload);
        Self {
            file_id,
            chunk_index,
            chunk_hash,
            is_last,
            payload,
        }
    }

    pub fn verify_hash(&self) -> bool {
        hash_payload(&self.payload) == self.chunk_hash
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(48 + self.payload.len());
        write_bytes(&mut buf, self.file_id.as_bytes());
        write_u32(&mut buf, self.chunk_index)?;
        write_bytes(&mut buf, &self.chunk_hash);
        let flags = if self.is_last { FLAG_IS_LAST } else { 0 };
        write_u8(&mut buf, flags)?;
        write_u16(&mut buf, self.payload.len() as u16)?;
        write_bytes(&mut buf, &self.payload);
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let file_id = FileId::from_bytes(read_array(&mut cur)?);
        let chunk_index = read_u32(&mut cur)?;
        let chunk_hash = read_array(&mut cur)?;
        let flags = read_u8(&mut cur)?;
        let payload_len = read_u16(&mut cur)? as usize;
        let payload = read_exact(&mut cur, payload_len)?;
        Ok(Self {
            file_id,
            chunk_index,
            chunk_hash,
            is_last: flags & FLAG_IS_LAST != 0,
            payload,
        })
    }
}

pub fn hash_payload(payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let chunk = Chunk::new(FileId::new(), 2, true, vec![1, 2, 3]);
        let encoded = chunk.encode().unwrap();
        let decoded = Chunk::decode(&encoded).unwrap();
        assert_eq!(decoded, chunk);
        assert!(decoded.verify_hash());
    }

    #[test]
    fn hash_mismatch_is_detectable() {
        let mut chunk = Chunk::new(FileId::new(), 0, false, vec![1, 2, 3]);
        chunk.payload[0] = 99;
        assert!(!chunk.verify_hash());
    }
}
