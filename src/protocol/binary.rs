//! Big-endian cursor read/write helpers shared by every wire type.
//!
//! Grounded on the teacher's `BinaryProtocol` — a byteorder-over-Cursor
//! encode/decode pattern — generalized from a single packet layout to the
//! several typed payloads this protocol needs (frame, handshake, manifest,
//! chunk, ack).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::{Error, Result};

pub fn write_u8(buf: &mut Vec<u8>, v: u8) -> Result<()> {
    buf.write_u8(v).map_err(Error::Io)
}

pub fn write_u16(buf: &mut Vec<u8>, v: u16) -> Result<()> {
    buf.write_u16::<BigEndian>(v).map_err(Error::Io)
}

pub fn write_u32(buf: &mut Vec<u8>, v: u32) -> Result<()> {
    buf.write_u32::<BigEndian>(v).map_err(Error::Io)
}

pub fn write_u64(buf: &mut Vec<u8>, v: u64) -> Result<()> {
    buf.write_u64::<BigEndian>(v).map_err(Error::Io)
}

pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(bytes);
}

/// Write a length-prefixed (`u16` length) UTF-8 string.
pub fn write_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(Error::Codec("string too long to encode".into()));
    }
    write_u16(buf, bytes.len() as u16)?;
    write_bytes(buf, bytes);
    Ok(())
}

pub fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8> {
    cur.read_u8().map_err(|e| truncated(e))
}

pub fn read_u16(cur: &mut Cursor<&[u8]>) -> Result<u16> {
    cur.read_u16::<BigEndian>().map_err(|e| truncated(e))
}

pub fn read_u32(cur: &mut Cursor<&[u8]>) -> Result<u32> {
    cur.read_u32::<BigEndian>().map_err(|e| truncated(e))
}

pub fn read_u64(cur: &mut Cursor<&[u8]>) -> Result<u64> {
    cur.read_u64::<BigEndian>().map_err(|e| truncated(e))
}

pub fn read_exact(cur: &mut Cursor<&[u8]>, n: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; n];
    cur.read_exact(&mut out).map_err(|e| truncated(e))?;
    Ok(out)
}

pub fn read_array<const N: usize>(cur: &mut Cursor<&[u8]>) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    cur.read_exact(&mut out).map_err(|e| truncated(e))?;
    Ok(out)
}

/// Read a length-prefixed (`u16` length) UTF-8 string.
pub fn read_str(cur: &mut Cursor<&[u8]>) -> Result<String> {
    let len = read_u16(cur)? as usize;
    let bytes = read_exact(cur, len)?;
    String::from_utf8(bytes).map_err(|e| Error::Codec(format!("invalid utf8: {e}")))
}

fn truncated(e: std::io::Error) -> Error {
    Error::Codec(format!("truncated frame: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 7).unwrap();
        write_u16(&mut buf, 1000).unwrap();
        write_u32(&mut buf, 70_000).unwrap();
        write_u64(&mut buf, u64::MAX / 2).unwrap();
        write_str(&mut buf, "hello").unwrap();

        let mut cur = Cursor::new(buf.as_slice());
        assert_eq!(read_u8(&mut cur).unwrap(), 7);
        assert_eq!(read_u16(&mut cur).unwrap(), 1000);
        assert_eq!(read_u32(&mut cur).unwrap(), 70_000);
        assert_eq!(read_u64(&mut cur).unwrap(), u64::MAX / 2);
        assert_eq!(read_str(&mut cur).unwrap(), "hello");
    }

    #[test]
    fn truncated_input_is_an_error() {
        let buf = vec![1u8, 2];
        let mut cur = Cursor::new(buf.as_slice());
        assert!(read_u32(&mut cur).is_err());
    }
}
