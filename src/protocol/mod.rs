//! Wire codec (C1): frames, handshake/rekey/version payloads, manifests,
//! chunks, and acks. All multi-byte integers are big-endian.

pub mod ack;
pub mod binary;
pub mod chunk;
pub mod constants;
pub mod envelope;
pub mod frame;
pub mod handshake;
pub mod identity_announce;
pub mod manifest;
pub mod types;

pub use ack::Ack;
pub use chunk::Chunk;
pub use envelope::EncryptedEnvelope;
pub use frame::{Frame, FrameType};
pub use handshake::{EphemeralKeyPayload, Version};
pub use identity_announce::IdentityAnnouncement;
pub use manifest::Manifest;
pub use types::{Compression, FileId, PeerId, Priority};

/// Current time in milliseconds since the Unix epoch, used wherever the
/// wire format or a state machine needs a timestamp.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
