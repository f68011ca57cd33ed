//! Error types for the home-node engine.

use haven_crypto::CryptoError;
use haven_wire::WireError;
use thiserror::Error;

/// Errors that can occur in home-node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Socket operation failed
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// A handshake step did not complete within its timeout
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// HELLO_ACK echoed a tag that was never sent
    #[error("coordinator echoed a foreign tag")]
    TagMismatch,

    /// Coordinator's key-binding signature failed against the pinned key
    #[error("coordinator signature rejected")]
    CoordinatorSignature,

    /// Registration acknowledgment did not open or did not say ok
    #[error("registration not acknowledged")]
    AckInvalid,

    /// Wire-level decode failure
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Cryptographic failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Operation requires a live registration
    #[error("not registered")]
    NotRegistered,

    /// Operation invalid in the current state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Failover coordinator address did not resolve
    #[error("failed to resolve {0}")]
    Resolve(String),

    /// The engine is shutting down; the pending attempt was abandoned
    #[error("shutting down")]
    ShuttingDown,
}

/// Result type for home-node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
