//! Secure random values for the protocol.
//!
//! All randomness comes from the operating system CSPRNG.

use crate::CryptoError;

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomFailed)
}

/// Generate a random 4-byte handshake tag.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_tag() -> Result<[u8; 4], CryptoError> {
    let mut buf = [0u8; 4];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a random challenge nonce (hex of 16 random bytes).
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_challenge() -> Result<String, CryptoError> {
    let mut buf = [0u8; 16];
    fill_random(&mut buf)?;
    Ok(hex::encode(buf))
}

/// Generate a random 16-byte signaling session id.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the underlying OS CSPRNG fails.
pub fn random_session_id() -> Result<[u8; 16], CryptoError> {
    let mut buf = [0u8; 16];
    fill_random(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_tag_varies() {
        let a = random_tag().unwrap();
        let b = random_tag().unwrap();
        // 4 bytes can collide but two draws matching is 1 in 2^32
        assert!(a != b || random_tag().unwrap() != a);
    }

    #[test]
    fn test_random_challenge_shape() {
        let challenge = random_challenge().unwrap();
        assert_eq!(challenge.len(), 32);
        assert!(challenge.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_random_session_id_varies() {
        assert_ne!(random_session_id().unwrap(), random_session_id().unwrap());
    }
}
