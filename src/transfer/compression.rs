//! Chunk-payload compression, the manifest's optional `compression` field
//! (spec §4.7 `compression∈{None,Lz4,Gzip}`). Each chunk is compressed and
//! decompressed independently, so `total_chunks` stays derived from the
//! uncompressed file size.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use crate::error::{Error, Result};
use crate::protocol::types::Compression;

const MIN_COMPRESSIBLE_BYTES: u64 = 4096;

/// Picks a scheme for a file this size, or `None` when the framing overhead
/// would swamp the benefit.
pub fn choose_for_file_size(file_size: u64) -> Option<Compression> {
    if file_size < MIN_COMPRESSIBLE_BYTES {
        None
    } else {
        Some(Compression::Lz4)
    }
}

pub fn compress(scheme: Option<Compression>, data: &[u8]) -> Result<Vec<u8>> {
    match scheme {
        None | Some(Compression::None) => Ok(data.to_vec()),
        Some(Compression::Lz4) => Ok(lz4_flex::compress_prepend_size(data)),
        Some(Compression::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

pub fn decompress(scheme: Option<Compression>, data: &[u8]) -> Result<Vec<u8>> {
    match scheme {
        None | Some(Compression::None) => Ok(data.to_vec()),
        Some(Compression::Lz4) => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| Error::Codec(format!("lz4 decompress failed: {e}"))),
        Some(Compression::Gzip) => {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_round_trips() {
        let data = vec![7u8; 10_000];
        let compressed = compress(Some(Compression::Lz4), &data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(Some(Compression::Lz4), &compressed).unwrap(), data);
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(200);
        let compressed = compress(Some(Compression::Gzip), &data).unwrap();
        assert_eq!(decompress(Some(Compression::Gzip), &compressed).unwrap(), data);
    }

    #[test]
    fn none_is_identity() {
        let data = vec![1, 2, 3];
        assert_eq!(compress(None, &data).unwrap(), data);
        assert_eq!(decompress(None, &data).unwrap(), data);
    }

    #[test]
    fn small_file_gets_no_compression() {
        assert_eq!(choose_for_file_size(100), None);
        assert_eq!(choose_for_file_size(1_000_000), Some(Compression::Lz4));
    }
}
