//! AEAD-GCM-256 message encryption with an explicit counter nonce.
//!
//! Each direction of a session keeps its own monotonic `u64` counter. The
//! counter is encoded as an 8-byte big-endian nonce and also passed as
//! associated data, so a replayed or reordered ciphertext fails
//! authentication rather than silently decrypting under the wrong counter.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::error::{Error, Result};

pub struct AeadKey {
    cipher: Aes256Gcm,
}

impl AeadKey {
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt `plaintext` under the given counter. The counter is used both
    /// as the nonce and as associated data.
    pub fn seal(&self, counter: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes = nonce_for_counter(counter);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = counter.to_be_bytes();
        self.cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| Error::Crypto(format!("aead seal failed: {e}")))
    }

    /// Decrypt `ciphertext` that was sealed under `counter`.
    pub fn open(&self, counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes = nonce_for_counter(counter);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = counter.to_be_bytes();
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::Crypto("aead open failed: authentication error".into()))
    }
}

/// The GCM nonce is 12 bytes: 4 zero bytes followed by the 8-byte
/// big-endian counter, keeping the counter itself unambiguous on the wire.
fn nonce_for_counter(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = AeadKey::new(&[7u8; 32]);
        let ct = key.seal(0, b"hello").unwrap();
        let pt = key.open(0, &ct).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn wrong_counter_fails() {
        let key = AeadKey::new(&[7u8; 32]);
        let ct = key.seal(0, b"hello").unwrap();
        assert!(key.open(1, &ct).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = AeadKey::new(&[7u8; 32]);
        let mut ct = key.seal(5, b"hello").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(key.open(5, &ct).is_err());
    }
}
