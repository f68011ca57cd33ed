//! Coordinator error types.
//!
//! Per-message failures are [`DropReason`]s: local to the offending
//! datagram, logged, and never acknowledged on the wire during
//! pre-authentication phases. Only socket-level failures are
//! [`CoordinatorError`]s and abort the engine lifecycle.

use thiserror::Error;

/// Fatal engine errors. Everything else is a per-message drop.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Socket bind failed
    #[error("bind failed: {0}")]
    Bind(std::io::Error),

    /// Socket send/receive hard failure
    #[error("socket error: {0}")]
    Socket(std::io::Error),

    /// Engine is shutting down
    #[error("engine shutting down")]
    ShuttingDown,
}

/// Why an inbound datagram was dropped without a reply.
///
/// Dropping is the uniform response to every pre-authentication failure;
/// the peer learns nothing beyond silence and restarts from HELLO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Frame or payload failed to decode
    Malformed,
    /// Reply-rate limit for the source address exceeded
    RateLimited,
    /// No transient session exists for the source address
    NoSession,
    /// Presented coordinator tag does not match the stored one
    TagMismatch,
    /// AEAD open failed (wrong key and tampering are indistinguishable)
    AuthenticationFailed,
    /// Envelope signature did not verify
    SignatureInvalid,
    /// Source address has no registration
    UnknownPeer,
    /// Registry is full
    CapacityExceeded,
    /// Message type not valid in the peer's current phase
    UnexpectedType,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Malformed => "malformed message",
            Self::RateLimited => "rate limited",
            Self::NoSession => "no session for address",
            Self::TagMismatch => "hello tag mismatch",
            Self::AuthenticationFailed => "authentication failed",
            Self::SignatureInvalid => "signature invalid",
            Self::UnknownPeer => "unknown peer",
            Self::CapacityExceeded => "registry at capacity",
            Self::UnexpectedType => "unexpected message type",
        };
        f.write_str(text)
    }
}
