//! AES-256-GCM sealing keyed by SHA-256 of a shared value.
//!
//! A sealed blob is `[nonce(12)][tag(16)][ciphertext]` with a fresh random
//! nonce per seal. Open failure means authentication failure; there is no
//! way to distinguish a wrong key from a tampered blob, and no plaintext
//! ever escapes a failed open. This is the sole authentication mechanism
//! for post-registration traffic.

use crate::{CryptoError, NONCE_SIZE, SESSION_KEY_SIZE, TAG_SIZE};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric session key (32 bytes), zeroized on drop.
///
/// Derived by hashing either the handshake shared secret or the current
/// `expected_answer` string; the digest is used directly as the AES-256
/// key, so both sides derive identical keys from identical roots.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Derive a key as SHA-256 of arbitrary root bytes.
    #[must_use]
    pub fn derive(root: &[u8]) -> Self {
        let digest = Sha256::digest(root);
        let mut key = [0u8; SESSION_KEY_SIZE];
        key.copy_from_slice(&digest);
        Self(key)
    }

    /// Derive the rotating key from the current expected answer.
    #[must_use]
    pub fn from_answer(expected_answer: &str) -> Self {
        Self::derive(expected_answer.as_bytes())
    }

    /// Seal plaintext under this key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if nonce generation fails and
    /// [`CryptoError::EncryptionFailed`] if AEAD encryption fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce).map_err(|_| CryptoError::RandomFailed)?;

        let cipher = Aes256Gcm::new_from_slice(&self.0).map_err(|_| CryptoError::EncryptionFailed)?;
        let ciphertext_and_tag = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        // aes-gcm appends the tag; the wire layout wants [nonce][tag][ct]
        let split = ciphertext_and_tag.len() - TAG_SIZE;
        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext_and_tag.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext_and_tag[split..]);
        blob.extend_from_slice(&ciphertext_and_tag[..split]);
        Ok(blob)
    }

    /// Open a sealed blob under this key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::SealedTooShort`] for blobs under 28 bytes and
    /// [`CryptoError::AuthenticationFailed`] on any tag or key mismatch.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::SealedTooShort);
        }
        let nonce = &blob[..NONCE_SIZE];
        let tag = &blob[NONCE_SIZE..NONCE_SIZE + TAG_SIZE];
        let ciphertext = &blob[NONCE_SIZE + TAG_SIZE..];

        let mut ciphertext_and_tag = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
        ciphertext_and_tag.extend_from_slice(ciphertext);
        ciphertext_and_tag.extend_from_slice(tag);

        let cipher =
            Aes256Gcm::new_from_slice(&self.0).map_err(|_| CryptoError::AuthenticationFailed)?;
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &ciphertext_and_tag,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// Hash a challenge with the shared passphrase:
/// `hex(SHA-256(challenge ∥ passphrase))`.
///
/// The result is both the client-facing proof-of-knowledge gate and the
/// root of the next rotating session key.
#[must_use]
pub fn hash_challenge_answer(challenge: &str, passphrase: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(passphrase.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = SessionKey::derive(b"shared secret bytes");
        let blob = key.seal(b"registration envelope").unwrap();
        assert_eq!(key.open(&blob).unwrap(), b"registration envelope");
    }

    #[test]
    fn test_blob_layout() {
        let key = SessionKey::derive(b"k");
        let blob = key.seal(b"xyz").unwrap();
        assert_eq!(blob.len(), NONCE_SIZE + TAG_SIZE + 3);
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let key = SessionKey::derive(b"k");
        let a = key.seal(b"same").unwrap();
        let b = key.seal(b"same").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = SessionKey::from_answer("h1");
        let stale = SessionKey::from_answer("h0");

        let blob = key.seal(b"heartbeat").unwrap();
        assert_eq!(
            stale.open(&blob),
            Err(CryptoError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_tampered_blob_fails() {
        let key = SessionKey::derive(b"k");
        let mut blob = key.seal(b"payload").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert_eq!(key.open(&blob), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = SessionKey::derive(b"k");
        let mut blob = key.seal(b"payload").unwrap();
        blob[NONCE_SIZE] ^= 0x01;
        assert_eq!(key.open(&blob), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_truncated_blob() {
        let key = SessionKey::derive(b"k");
        assert_eq!(key.open(&[0u8; 27]), Err(CryptoError::SealedTooShort));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = SessionKey::derive(b"k");
        let blob = key.seal(b"").unwrap();
        assert_eq!(blob.len(), NONCE_SIZE + TAG_SIZE);
        assert_eq!(key.open(&blob).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_same_root_same_key() {
        let a = SessionKey::from_answer("answer");
        let b = SessionKey::from_answer("answer");
        let blob = a.seal(b"cross").unwrap();
        assert_eq!(b.open(&blob).unwrap(), b"cross");
    }

    #[test]
    fn test_challenge_answer_hash() {
        let answer = hash_challenge_answer("c1", "swordfish");
        assert_eq!(answer.len(), 64);
        assert!(answer.chars().all(|c| c.is_ascii_hexdigit()));

        // deterministic, passphrase-sensitive, challenge-sensitive
        assert_eq!(answer, hash_challenge_answer("c1", "swordfish"));
        assert_ne!(answer, hash_challenge_answer("c1", "tuna"));
        assert_ne!(answer, hash_challenge_answer("c2", "swordfish"));
    }

    #[test]
    fn test_concatenation_is_not_ambiguous_here() {
        // "ab" + "c" and "a" + "bc" collide by construction of SHA-256 over
        // the raw concatenation; the protocol tolerates this because the
        // challenge is always a fixed-width hex string.
        assert_eq!(
            hash_challenge_answer("ab", "c"),
            hash_challenge_answer("a", "bc")
        );
    }

    proptest! {
        #[test]
        fn prop_seal_open_roundtrip(
            root in proptest::collection::vec(any::<u8>(), 0..64),
            plaintext in proptest::collection::vec(any::<u8>(), 0..1024),
        ) {
            let key = SessionKey::derive(&root);
            let blob = key.seal(&plaintext).unwrap();
            prop_assert_eq!(key.open(&blob).unwrap(), plaintext);
        }

        #[test]
        fn prop_open_never_panics_on_garbage(
            blob in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let key = SessionKey::derive(b"k");
            let _ = key.open(&blob);
        }
    }
}
