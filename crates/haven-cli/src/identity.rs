//! Identity key file handling.
//!
//! A key file holds the 32-byte Ed25519 seed, hex-encoded, mode 0600 on
//! unix. The engines never read files themselves; this is the collaborator
//! that loads material for them.

use anyhow::{bail, Context};
use haven_crypto::signing::SigningIdentity;
use haven_crypto::SignatureScheme;
use rand_core::OsRng;
use std::fs;
use std::path::Path;

/// Load an identity from `path`, or generate and persist one if the file
/// does not exist.
pub fn load_or_generate(path: &Path) -> anyhow::Result<SigningIdentity> {
    if path.exists() {
        load(path)
    } else {
        let identity = SigningIdentity::generate(SignatureScheme::Ed25519, &mut OsRng);
        save(path, &identity)?;
        tracing::info!(path = %path.display(), "generated new identity");
        Ok(identity)
    }
}

/// Load an identity from a hex seed file.
pub fn load(path: &Path) -> anyhow::Result<SigningIdentity> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading identity file {}", path.display()))?;
    let bytes = hex::decode(raw.trim()).context("identity file is not valid hex")?;
    let seed: [u8; 32] = match bytes.try_into() {
        Ok(seed) => seed,
        Err(_) => bail!("identity file must hold exactly 32 hex-encoded bytes"),
    };
    Ok(SigningIdentity::from_seed(&seed))
}

/// Persist an identity seed to `path`, creating parent directories.
pub fn save(path: &Path, identity: &SigningIdentity) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, hex::encode(identity.to_seed()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_key");

        let generated = load_or_generate(&path).unwrap();
        let loaded = load_or_generate(&path).unwrap();

        assert_eq!(
            generated.verifying_key().to_bytes(),
            loaded.verifying_key().to_bytes()
        );
    }

    #[test]
    fn test_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_key");
        fs::write(&path, "not hex at all").unwrap();
        assert!(load(&path).is_err());

        fs::write(&path, "abcd").unwrap(); // valid hex, wrong length
        assert!(load(&path).is_err());
    }
}
