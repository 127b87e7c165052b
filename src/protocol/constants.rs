//! Wire-level constants pinned by the specification.

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed portion of the frame header, before the optional recipient id.
pub const FRAME_HEADER_MIN_SIZE: usize = 13;

/// Length in bytes of a rendered peer id (12 hex-ASCII characters).
pub const PEER_ID_WIRE_LEN: usize = 12;

// Frame message types (subset relevant to the core, per spec §4.1).
pub const TYPE_HANDSHAKE: u8 = 0x00;
pub const TYPE_ENCRYPTED: u8 = 0x01;
pub const TYPE_IDENTITY_ANNOUNCE: u8 = 0x02;
pub const TYPE_VERSION_NEGOTIATION: u8 = 0x04;
pub const TYPE_REKEY_REQUEST: u8 = 0x05;
pub const TYPE_REKEY_RESPONSE: u8 = 0x06;
pub const TYPE_FILE_MANIFEST: u8 = 0x0D;
pub const TYPE_FILE_CHUNK: u8 = 0x0E;
pub const TYPE_FILE_ACK: u8 = 0x0F;
pub const TYPE_PROTOCOL_ACK: u8 = 0x10;

/// Broadcast sentinel recipient id: all-zero ASCII (twelve `'0'` bytes).
pub const BROADCAST_SENTINEL: [u8; PEER_ID_WIRE_LEN] = [b'0'; PEER_ID_WIRE_LEN];

/// Default hop budget for broadcast application messages.
pub const BROADCAST_TTL: u8 = 7;

/// Default hop budget for direct-addressed file data.
pub const DIRECTED_TTL: u8 = 2;

/// Chunk payload size on the constrained (BLE-class) transport.
pub const CHUNK_BYTES_CONSTRAINED: usize = 480;

/// Maximum chunk payload size on the high-bandwidth (WiFi-Direct-class)
/// transport.
pub const CHUNK_BYTES_HIGHBW: usize = 65_536;

/// RECOMMENDED maximum file size; larger files are flagged, not refused.
pub const RECOMMENDED_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
