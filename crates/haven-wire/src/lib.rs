//! # HAVEN Wire
//!
//! Wire codec for the HAVEN rendezvous protocol.
//!
//! Every datagram is framed as `[version(1)][type(1)][payload]`. Payload
//! layouts use explicit length prefixes (1 byte for short fixed-size fields
//! such as tags and public keys, 2 bytes big-endian for variable blobs,
//! 8 bytes big-endian for timestamps) so decoding never depends on
//! delimiter scanning.
//!
//! This crate is pure and stateless: no cryptography, no I/O, no payload
//! interpretation. Sealed blobs pass through as opaque bytes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod payload;

pub use error::WireError;
pub use frame::{decode_frame, encode_frame, MessageType};

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 1;

/// Minimum frame length (version + type).
pub const MIN_FRAME_LEN: usize = 2;

/// Handshake tag size.
pub const TAG_LEN: usize = 4;

/// Public key size (X25519 and Ed25519).
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 signature size.
pub const SIGNATURE_LEN: usize = 64;

/// Signaling session identifier size.
pub const SESSION_ID_LEN: usize = 16;
