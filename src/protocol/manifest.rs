//! `FILE_MANIFEST` payload (frame type `0x0D`).

use std::io::Cursor;

use crate::error::{Error, Result};
use crate::protocol::binary::*;
use crate::protocol::types::{Compression, FileId, PeerId, Priority};

const FLAG_COMPRESSION_PRESENT: u8 = 0x01;
const FLAG_CHUNK_HASHES_PRESENT: u8 = 0x02;

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub file_id: FileId,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
    pub sha256: [u8; 32],
    pub sender_id: PeerId,
    pub timestamp_ms: u64,
    pub priority: Priority,
    pub compression: Option<Compression>,
    pub chunk_hashes: Option<Vec<[u8; 32]>>,
}

impl Manifest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut flags = 0u8;
        if self.compression.is_some() {
            flags |= FLAG_COMPRESSION_PRESENT;
        }
        if self.chunk_hashes.is_some() {
            flags |= FLAG_CHUNK_HASHES_PRESENT;
        }

        let mut buf = Vec::new();
        write_bytes(&mut buf, self.file_id.as_bytes());
        write_str(&mut buf, &self.file_name)?;
        write_u64(&mut buf, self.file_size)?;
        write_u32(&mut buf, self.total_chunks)?;
        write_bytes(&mut buf, &self.sha256);
        write_bytes(&mut buf, self.sender_id.as_wire_bytes());
        write_u64(&mut buf, self.timestamp_ms)?;
        write_u8(&mut buf, self.priority as u8)?;
        write_u8(&mut buf, flags)?;

        if let Some(compression) = self.compression {
            write_u8(&mut buf, compression as u8)?;
        }
        if let Some(hashes) = &self.chunk_hashes {
            write_u32(&mut buf, hashes.len() as u32)?;
            for h in hashes {
                write_bytes(&mut buf, h);
            }
        }
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let file_id = FileId::from_bytes(read_array(&mut cur)?);
        let file_name = read_str(&mut cur)?;
        let file_size = read_u64(&mut cur)?;
        let total_chunks = read_u32(&mut cur)?;
        let sha256 = read_array(&mut cur)?;
        let sender_id = PeerId::from_wire_bytes(read_array(&mut cur)?)?;
        let timestamp_ms = read_u64(&mut cur)?;
        let priority = Priority::from_u8(read_u8(&mut cur)?)?;
        let flags = read_u8(&mut cur)?;

        let compression = if flags & FLAG_COMPRESSION_PRESENT != 0 {
            Some(Compression::from_u8(read_u8(&mut cur)?)?)
        } else {
            None
        };

        let chunk_hashes = if flags & FLAG_CHUNK_HASHES_PRESENT != 0 {
            let count = read_u32(&mut cur)? as usize;
            let mut hashes = Vec::with_capacity(count);
            for _ in 0..count {
                hashes.push(read_array(&mut cur)?);
            }
            Some(hashes)
        } else {
            None
        };

        if cur.position() as usize != data.len() {
            return Err(Error::Codec("trailing bytes in manifest payload".into()));
        }

        Ok(Self {
            file_id,
            file_name,
            file_size,
            total_chunks,
            sha256,
            sender_id,
            timestamp_ms,
            priority,
            compression,
            chunk_hashes,
        })
    }
}

/// `total_chunks = ceil(file_size / chunk_bytes)`, per spec §3. A
/// zero-byte file has zero chunks.
pub fn total_chunks(file_size: u64, chunk_bytes: usize) -> u32 {
    if file_size == 0 {
        return 0;
    }
    let chunk_bytes = chunk_bytes as u64;
    (file_size.div_ceil(chunk_bytes)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerId {
        PeerId::from_hex("0123456789ab").unwrap()
    }

    #[test]
    fn round_trips_minimal_manifest() {
        let m = Manifest {
            file_id: FileId::new(),
            file_name: "note.txt".into(),
            file_size: 1000,
            total_chunks: 3,
            sha256: [1u8; 32],
            sender_id: peer(),
            timestamp_ms: 42,
            priority: Priority::Normal,
            compression: None,
            chunk_hashes: None,
        };
        let encoded = m.encode().unwrap();
        assert_eq!(Manifest::decode(&encoded).unwrap(), m);
    }

    #[test]
    fn round_trips_full_manifest() {
        let m = Manifest {
            file_id: FileId::new(),
            file_name: "archive.bin".into(),
            file_size: 2_000_000,
            total_chunks: 31,
            sha256: [2u8; 32],
            sender_id: peer(),
            timestamp_ms: 99,
            priority: Priority::Urgent,
            compression: Some(Compression::Lz4),
            chunk_hashes: Some(vec![[3u8; 32], [4u8; 32]]),
        };
        let encoded = m.encode().unwrap();
        assert_eq!(Manifest::decode(&encoded).unwrap(), m);
    }

    #[test]
    fn chunk_count_boundaries() {
        assert_eq!(total_chunks(0, 480), 0);
        assert_eq!(total_chunks(480, 480), 1);
        assert_eq!(total_chunks(481, 480), 2);
        assert_eq!(total_chunks(1000, 480), 3);
    }
}
