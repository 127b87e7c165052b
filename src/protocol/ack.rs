//! `FILE_ACK` payload (frame type `0x0F`).
//!
//! The wire carries `acknowledged`, `missing`, and `bitmap` together; per
//! the design-notes resolution, `bitmap` is canonical whenever both are
//! present. This implementation always derives all three from a single
//! `completed: BTreeSet<u32>` on encode, and on decode prefers `bitmap`
//! over the explicit sets when it is non-empty.

use std::collections::BTreeSet;
use std::io::Cursor;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::binary::*;
use crate::protocol::types::{FileId, PeerId};

const FLAG_PAUSE: u8 = 0x01;
const FLAG_CANCEL: u8 = 0x02;
const FLAG_TRANSFER_COMPLETE: u8 = 0x04;

#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub file_id: FileId,
    pub ack_id: [u8; 16],
    pub receiver_id: PeerId,
    pub completed: BTreeSet<u32>,
    pub total_chunks: u32,
    pub pause: bool,
    pub cancel: bool,
    pub transfer_complete: bool,
    pub timestamp_ms: u64,
}

impl Ack {
    pub fn new(
        file_id: FileId,
        receiver_id: PeerId,
        completed: BTreeSet<u32>,
        total_chunks: u32,
        timestamp_ms: u64,
    ) -> Self {
        let transfer_complete = total_chunks > 0 && completed.len() as u32 == total_chunks;
        Self {
            file_id,
            ack_id: *Uuid::new_v4().as_bytes(),
            receiver_id,
            completed,
            total_chunks,
            pause: false,
            cancel: false,
            transfer_complete,
            timestamp_ms,
        }
    }

    pub fn missing(&self) -> BTreeSet<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.completed.contains(i))
            .collect()
    }

    fn bitmap(&self) -> Vec<u8> {
        let bytes = (self.total_chunks as usize).div_ceil(8);
        let mut bitmap = vec![0u8; bytes];
        for &i in &self.completed {
            let byte = (i / 8) as usize;
            let bit = (i % 8) as u8;
            if byte < bitmap.len() {
                bitmap[byte] |= 1 << bit;
            }
        }
        bitmap
    }

    fn completed_from_bitmap(bitmap: &[u8], total_chunks: u32) -> BTreeSet<u32> {
        let mut set = BTreeSet::new();
        for i in 0..total_chunks {
            let byte = (i / 8) as usize;
            let bit = (i % 8) as u8;
            if byte < bitmap.len() && bitmap[byte] & (1 << bit) != 0 {
                set.insert(i);
            }
        }
        set
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let acked: Vec<u32> = self.completed.iter().copied().collect();
        let missing: Vec<u32> = self.missing().into_iter().collect();
        let bitmap = self.bitmap();

        let mut flags = 0u8;
        if self.pause {
            flags |= FLAG_PAUSE;
        }
        if self.cancel {
            flags |= FLAG_CANCEL;
        }
        if self.transfer_complete {
            flags |= FLAG_TRANSFER_COMPLETE;
        }

        let mut buf = Vec::new();
        write_bytes(&mut buf, self.file_id.as_bytes());
        write_bytes(&mut buf, &self.ack_id);
        write_bytes(&mut buf, self.receiver_id.as_wire_bytes());

        write_u32(&mut buf, acked.len() as u32)?;
        for i in &acked {
            write_u32(&mut buf, *i)?;
        }
        write_u32(&mut buf, missing.len() as u32)?;
        for i in &missing {
            write_u32(&mut buf, *i)?;
        }
        write_u16(&mut buf, bitmap.len() as u16)?;
        write_bytes(&mut buf, &bitmap);
        write_u8(&mut buf, flags)?;
        write_u32(&mut buf, self.completed.len() as u32)?;
        write_u64(&mut buf, self.timestamp_ms)?;
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let file_id = FileId::from_bytes(read_array(&mut cur)?);
        let ack_id = read_array(&mut cur)?;
        let receiver_id = PeerId::from_wire_bytes(read_array(&mut cur)?)?;

        let acked_count = read_u32(&mut cur)? as usize;
        let mut acked = BTreeSet::new();
        for _ in 0..acked_count {
            acked.insert(read_u32(&mut cur)?);
        }

        let missing_count = read_u32(&mut cur)? as usize;
        let mut missing_set = BTreeSet::new();
        for _ in 0..missing_count {
            missing_set.insert(read_u32(&mut cur)?);
        }

        let bitmap_len = read_u16(&mut cur)? as usize;
        let bitmap = read_exact(&mut cur, bitmap_len)?;
        let flags = read_u8(&mut cur)?;
        let total_received = read_u32(&mut cur)?;
        let timestamp_ms = read_u64(&mut cur)?;

        if cur.position() as usize != data.len() {
            return Err(Error::Codec("trailing bytes in ack payload".into()));
        }

        // Reconstruct total_chunks from whichever source is richer: the
        // bitmap tells us the bit count, acked ∪ missing tells us the span.
        let from_sets_total = acked
            .iter()
            .chain(missing_set.iter())
            .copied()
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
            .max(acked.len() as u32 + missing_set.len() as u32);
        let total_chunks = if !bitmap.is_empty() {
            (bitmap.len() as u32 * 8).min(from_sets_total.max(bitmap.len() as u32 * 8))
        } else {
            from_sets_total
        };

        let completed = if !bitmap.is_empty() {
            Self::completed_from_bitmap(&bitmap, total_chunks)
        } else {
            acked
        };

        let _ = total_received;

        Ok(Self {
            file_id,
            ack_id,
            receiver_id,
            completed,
            total_chunks,
            pause: flags & FLAG_PAUSE != 0,
            cancel: flags & FLAG_CANCEL != 0,
            transfer_complete: flags & FLAG_TRANSFER_COMPLETE != 0,
            timestamp_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerId {
        PeerId::from_hex("abcdef012345").unwrap()
    }

    #[test]
    fn round_trips_partial_ack() {
        let mut completed = BTreeSet::new();
        completed.insert(0);
        completed.insert(2);
        let ack = Ack::new(FileId::new(), peer(), completed, 3, 10);
        let encoded = ack.encode().unwrap();
        let decoded = Ack::decode(&encoded).unwrap();
        assert_eq!(decoded.completed, ack.completed);
        assert_eq!(decoded.missing(), [1].into_iter().collect());
        assert!(!decoded.transfer_complete);
    }

    #[test]
    fn complete_ack_sets_flag() {
        let completed: BTreeSet<u32> = [0, 1, 2].into_iter().collect();
        let ack = Ack::new(FileId::new(), peer(), completed, 3, 1);
        assert!(ack.transfer_complete);
        let encoded = ack.encode().unwrap();
        let decoded = Ack::decode(&encoded).unwrap();
        assert!(decoded.transfer_complete);
        assert!(decoded.missing().is_empty());
    }
}
