//! HKDF-SHA256 key derivation from a raw Diffie-Hellman shared secret.
//!
//! The session layer keeps a single shared symmetric key per session (not
//! a split send/recv pair) — each direction tracks its own counter against
//! the same key, exactly as spec §3's `Session.symmetric_key?` (singular)
//! implies.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{Error, Result};

/// Salt for the initial handshake derivation, per spec §4.3:
/// `HKDF-SHA256(salt = "noise-<engine>-v1", ikm = DH_output, info = "", L = 32)`.
pub const HANDSHAKE_SALT: &[u8] = b"noise-meshdrop-v1";

/// Salt for rekey derivations — distinct from the handshake salt so a
/// rekeyed session's key cannot be confused with an initial one even if
/// the same ephemeral keys were ever reused (see DESIGN.md).
pub const REKEY_SALT: &[u8] = b"noise-meshdrop-rekey-v1";

/// Derive the 32-byte session key from a DH shared secret.
pub fn derive_session_key(shared_secret: &[u8; 32], salt: &[u8]) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(b"", &mut okm)
        .map_err(|e| Error::Crypto(format!("hkdf expand failed: {e}")))?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic_and_salt_sensitive() {
        let shared = [9u8; 32];
        let a = derive_session_key(&shared, HANDSHAKE_SALT).unwrap();
        let b = derive_session_key(&shared, HANDSHAKE_SALT).unwrap();
        assert_eq!(a, b);
        let c = derive_session_key(&shared, REKEY_SALT).unwrap();
        assert_ne!(a, c);
    }
}
