//! Cryptographic primitives: identity keys, AEAD framing, key derivation.

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::AeadKey;
pub use keys::{random_bytes, EphemeralKeyPair, StaticIdentity};
