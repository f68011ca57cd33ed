//! Wire codec error types.

use thiserror::Error;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input shorter than the minimum for the structure being decoded.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum length required
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// Version byte does not match the supported protocol version.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Type byte is not a known message type.
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),

    /// Payload bytes do not match the expected layout.
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
}
