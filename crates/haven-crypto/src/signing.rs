//! Ed25519 long-term signing identities.
//!
//! The public half of a [`SigningIdentity`] is a node's durable identity;
//! its compact 32-byte encoding keys the coordinator registry. Signed
//! structures are canonical raw-field concatenations, never a generic
//! serialization.

use crate::{CryptoError, SignatureScheme};
use ed25519_dalek::{Signer, Verifier};
use rand_core::{CryptoRng, RngCore};
use zeroize::ZeroizeOnDrop;

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Create a signature from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the raw signature bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }

    fn to_dalek(self) -> ed25519_dalek::Signature {
        ed25519_dalek::Signature::from_bytes(&self.0)
    }
}

/// Long-term signing identity (private half).
///
/// Zeroized on drop. Persistence of the 32-byte seed is a collaborator
/// responsibility; this type never touches the filesystem.
#[derive(ZeroizeOnDrop)]
pub struct SigningIdentity {
    inner: ed25519_dalek::SigningKey,
}

impl SigningIdentity {
    /// Generate a new random identity.
    ///
    /// `Ed448` is accepted for forward compatibility but has no backend in
    /// this build; it falls back to Ed25519.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(scheme: SignatureScheme, rng: &mut R) -> Self {
        let _ = scheme; // only Ed25519 is backed; Ed448 falls back
        Self {
            inner: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    /// Restore an identity from its 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Export the 32-byte seed. Handle with care.
    #[must_use]
    pub fn to_seed(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Sign a canonical byte string. Deterministic.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.inner.sign(message).to_bytes())
    }

    /// The public half.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }
}

/// The public half of a signing identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl VerifyingKey {
    /// Import from the compact 32-byte encoding.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the bytes are not a
    /// valid curve point.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// The compact 32-byte encoding. This is the node's canonical identity.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Verify a signature over a canonical byte string.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the signature does not
    /// authenticate the message under this key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        self.inner
            .verify(message, &signature.to_dalek())
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl std::fmt::Display for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}
