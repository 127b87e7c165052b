//! Long-term and ephemeral key material.
//!
//! `StaticIdentity` is the long-term Ed25519 signing keypair plus its X25519
//! Diffie-Hellman counterpart, held for the lifetime of an installation.
//! `EphemeralKeyPair` is generated fresh for every handshake and dropped
//! once the session key is derived.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// A static (long-term) X25519 + Ed25519 identity.
pub struct StaticIdentity {
    dh_secret: StaticSecret,
    dh_public: PublicKey,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl StaticIdentity {
    /// Generate a fresh identity from OS randomness.
    pub fn generate() -> Self {
        let dh_secret = StaticSecret::random_from_rng(OsRng);
        let dh_public = PublicKey::from(&dh_secret);
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            dh_secret,
            dh_public,
            signing_key,
            verifying_key,
        }
    }

    /// Reconstruct an identity from a 64-byte seed (32 bytes DH secret, 32
    /// bytes Ed25519 seed), as persisted by a [`crate::keystore::KeyStore`].
    pub fn from_seed(seed: &[u8; 64]) -> Result<Self> {
        let mut dh_bytes = [0u8; 32];
        dh_bytes.copy_from_slice(&seed[..32]);
        let dh_secret = StaticSecret::from(dh_bytes);
        let dh_public = PublicKey::from(&dh_secret);

        let mut ed_bytes = [0u8; 32];
        ed_bytes.copy_from_slice(&seed[32..]);
        let signing_key = SigningKey::from_bytes(&ed_bytes);
        let verifying_key = signing_key.verifying_key();

        dh_bytes.zeroize();
        ed_bytes.zeroize();

        Ok(Self {
            dh_secret,
            dh_public,
            signing_key,
            verifying_key,
        })
    }

    /// Serialize to the 64-byte seed understood by [`Self::from_seed`].
    pub fn to_seed(&self) -> [u8; 64] {
        let mut seed = [0u8; 64];
        seed[..32].copy_from_slice(&self.dh_secret.to_bytes());
        seed[32..].copy_from_slice(&self.signing_key.to_bytes());
        seed
    }

    pub fn dh_public(&self) -> PublicKey {
        self.dh_public
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }

    /// Stable fingerprint: the hex SHA-256 digest of the Ed25519 public key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.verifying_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn diffie_hellman(&self, their_public: &PublicKey) -> [u8; 32] {
        self.dh_secret.diffie_hellman(their_public).to_bytes()
    }
}

impl std::fmt::Debug for StaticIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticIdentity")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Verify a detached signature against a raw Ed25519 public key.
pub fn verify(public_key: &VerifyingKey, message: &[u8], signature: &Signature) -> Result<()> {
    public_key
        .verify(message, signature)
        .map_err(|e| Error::Crypto(format!("signature verification failed: {e}")))
}

/// A fresh, one-shot Diffie-Hellman keypair generated per handshake attempt.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    pub fn diffie_hellman(&self, their_public: &PublicKey) -> [u8; 32] {
        self.secret.diffie_hellman(their_public).to_bytes()
    }
}

/// Generate `n` random bytes from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_is_symmetric() {
        let a = StaticIdentity::generate();
        let b = EphemeralKeyPair::generate();
        let shared_a = a.diffie_hellman(&b.public());
        let shared_b = b.diffie_hellman(&a.dh_public());
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn seed_round_trips() {
        let a = StaticIdentity::generate();
        let seed = a.to_seed();
        let restored = StaticIdentity::from_seed(&seed).unwrap();
        assert_eq!(a.fingerprint(), restored.fingerprint());
        assert_eq!(a.dh_public().as_bytes(), restored.dh_public().as_bytes());
    }

    #[test]
    fn sign_and_verify() {
        let id = StaticIdentity::generate();
        let sig = id.sign(b"hello mesh");
        verify(&id.verifying_key(), b"hello mesh", &sig).unwrap();
        assert!(verify(&id.verifying_key(), b"tampered", &sig).is_err());
    }
}
