//! X25519 Diffie-Hellman key agreement (RFC 7748).
//!
//! Keypairs are generated fresh for exactly one handshake attempt and
//! dropped once the shared secret is derived. Low-order peer points are
//! rejected. Secret halves are zeroized on drop.

use crate::{Agreement, CryptoError};
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Ephemeral agreement secret key (32 bytes).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(x25519_dalek::StaticSecret);

/// Agreement public key (32 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// Derived shared secret (32 bytes).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

/// An ephemeral agreement keypair for a single handshake attempt.
pub struct EphemeralKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh keypair.
    ///
    /// `X448` is accepted for forward compatibility but has no backend in
    /// this build; it falls back to X25519.
    pub fn generate<R: RngCore + CryptoRng>(algorithm: Agreement, rng: &mut R) -> Self {
        let _ = algorithm; // only X25519 is backed; X448 falls back
        let secret = x25519_dalek::StaticSecret::random_from_rng(rng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self {
            secret: SecretKey(secret),
            public: PublicKey(public),
        }
    }

    /// The public half, for transmission to the peer.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Perform Diffie-Hellman agreement, consuming the keypair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Agreement`] if the peer key is a low-order
    /// point (the all-zero shared secret).
    pub fn agree(self, peer_public: &PublicKey) -> Result<SharedSecret, CryptoError> {
        let shared = self.secret.0.diffie_hellman(&peer_public.0);
        if shared.as_bytes() == &[0u8; 32] {
            return Err(CryptoError::Agreement);
        }
        Ok(SharedSecret(shared))
    }
}

impl PublicKey {
    /// Import a public key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Export as raw bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Raw bytes as a reference.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl SharedSecret {
    /// Raw shared-secret bytes. Feed through [`crate::sealed::SessionKey`]
    /// before use as an encryption key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}
