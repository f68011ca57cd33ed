//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Diffie-Hellman agreement failed (malformed or low-order peer key)
    #[error("key agreement failed")]
    Agreement,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD open failed. Tag mismatch and wrong key are indistinguishable.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Sealed blob shorter than nonce + tag
    #[error("sealed blob truncated")]
    SealedTooShort,

    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,

    /// Invalid public key
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,
}
