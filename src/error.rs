//! Error types for the MeshDrop engine.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error taxonomy.
///
/// Variants map onto the error kinds in the specification's propagation
/// policy: codec/radio errors are counted and swallowed by callers that
/// construct them; session/transfer errors are surfaced once to the
/// facade's event stream.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("handshake error: {0}")]
    Handshake(String),

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("chunk retries exhausted: {0}")]
    ChunkExhausted(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("no compatible transport: {0}")]
    Transport(String),

    #[error("peer unreachable: {0}")]
    PeerGone(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("key store error: {0}")]
    KeyStore(String),

    #[error("blob error: {0}")]
    Blob(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("transfer not found: {0}")]
    TransferNotFound(String),

    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
