//! KDF — HKDF-SHA256 derivation of the 32-byte data key.
//!
//! HKDF-SHA256 over content-derived input keying material: there is no
//! password to stretch, only content to bind a key to.

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KdfError {
    #[error("HKDF expand failed (requested output too long)")]
    ExpandFailed,
}

/// Derive the 32-byte data key: HKDF-SHA256(salt, ikm, info).
///
/// `info` is the per-version label from [`crate::version::VersionDescriptor`]
/// — the sole source of that mapping, so keys stay non-reusable across
/// formats without a second copy of the label table to keep in sync.
pub fn derive_key(salt: &[u8; 16], ikm: &[u8], info: &[u8]) -> Result<[u8; 32], KdfError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm).map_err(|_| KdfError::ExpandFailed)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let salt = [1u8; 16];
        let ikm = b"some content bytes";
        let a = derive_key(&salt, ikm, b"QLTX-KEY-V1").unwrap();
        let b = derive_key(&salt, ikm, b"QLTX-KEY-V1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn info_label_changes_key() {
        let salt = [1u8; 16];
        let ikm = b"some content bytes";
        let a = derive_key(&salt, ikm, b"QLTX-KEY-V1").unwrap();
        let b = derive_key(&salt, ikm, b"QLTX-KEY-V2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn ikm_changes_key() {
        let salt = [1u8; 16];
        let a = derive_key(&salt, b"input-a", b"QLTX-KEY-V1").unwrap();
        let b = derive_key(&salt, b"input-b", b"QLTX-KEY-V1").unwrap();
        assert_ne!(a, b);
    }
}
