//! AEADSealer — seal/open one block with ChaCha20-Poly1305 or AES-256-GCM.
//!
//! Two algorithms, selected per `VersionDescriptor`, with the nonce carried
//! separately in the footer rather than inline — Qeltrix blocks are
//! concatenated back-to-back with no per-block header to read a prepended
//! nonce from.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use thiserror::Error;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("AEAD tag verification failed")]
    TagMismatch,
    #[error("AEAD cipher initialization failed")]
    BadKey,
}

/// Selects which AEAD a container uses. Mirrors `metadata.algo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgo {
    ChaCha20,
    Aes256,
}

impl AeadAlgo {
    pub fn name(self) -> &'static str {
        match self {
            AeadAlgo::ChaCha20 => "chacha20",
            AeadAlgo::Aes256 => "aes256",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "chacha20" => Some(AeadAlgo::ChaCha20),
            "aes256" => Some(AeadAlgo::Aes256),
            _ => None,
        }
    }
}

/// Generates a fresh random 96-bit nonce. Never reused by the caller across
/// blocks within one container — see spec invariant (b).
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

pub trait Sealer: Send + Sync {
    fn seal(
        &self,
        key: &[u8; 32],
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, AuthError>;

    fn open(
        &self,
        key: &[u8; 32],
        nonce: &[u8; NONCE_LEN],
        ciphertext_with_tag: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, AuthError>;
}

pub struct ChaCha20Sealer;
impl Sealer for ChaCha20Sealer {
    fn seal(
        &self,
        key: &[u8; 32],
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, AuthError> {
        let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| AuthError::BadKey)?;
        cipher
            .encrypt(
                nonce.into(),
                chacha20poly1305::aead::Payload { msg: plaintext, aad: ad },
            )
            .map_err(|_| AuthError::BadKey)
    }

    fn open(
        &self,
        key: &[u8; 32],
        nonce: &[u8; NONCE_LEN],
        ciphertext_with_tag: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, AuthError> {
        let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| AuthError::BadKey)?;
        cipher
            .decrypt(
                nonce.into(),
                chacha20poly1305::aead::Payload { msg: ciphertext_with_tag, aad: ad },
            )
            .map_err(|_| AuthError::TagMismatch)
    }
}

pub struct Aes256Sealer;
impl Sealer for Aes256Sealer {
    fn seal(
        &self,
        key: &[u8; 32],
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, AuthError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AuthError::BadKey)?;
        cipher
            .encrypt(nonce.into(), aes_gcm::aead::Payload { msg: plaintext, aad: ad })
            .map_err(|_| AuthError::BadKey)
    }

    fn open(
        &self,
        key: &[u8; 32],
        nonce: &[u8; NONCE_LEN],
        ciphertext_with_tag: &[u8],
        ad: &[u8],
    ) -> Result<Vec<u8>, AuthError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AuthError::BadKey)?;
        cipher
            .decrypt(nonce.into(), aes_gcm::aead::Payload { msg: ciphertext_with_tag, aad: ad })
            .map_err(|_| AuthError::TagMismatch)
    }
}

pub fn get_sealer(algo: AeadAlgo) -> Box<dyn Sealer> {
    match algo {
        AeadAlgo::ChaCha20 => Box::new(ChaCha20Sealer),
        AeadAlgo::Aes256 => Box::new(Aes256Sealer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chacha20_roundtrip() {
        let sealer = ChaCha20Sealer;
        let key = [3u8; 32];
        let nonce = random_nonce();
        let ad = b"metadata-bytes";
        let ct = sealer.seal(&key, &nonce, b"hello", ad).unwrap();
        let pt = sealer.open(&key, &nonce, &ct, ad).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn aes256_roundtrip() {
        let sealer = Aes256Sealer;
        let key = [5u8; 32];
        let nonce = random_nonce();
        let ad = b"metadata-bytes";
        let ct = sealer.seal(&key, &nonce, b"world", ad).unwrap();
        let pt = sealer.open(&key, &nonce, &ct, ad).unwrap();
        assert_eq!(pt, b"world");
    }

    #[test]
    fn ad_binding_rejects_tampered_ad() {
        let sealer = ChaCha20Sealer;
        let key = [1u8; 32];
        let nonce = random_nonce();
        let ct = sealer.seal(&key, &nonce, b"payload", b"ad-a").unwrap();
        let err = sealer.open(&key, &nonce, &ct, b"ad-b").unwrap_err();
        assert!(matches!(err, AuthError::TagMismatch));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let sealer = Aes256Sealer;
        let key = [2u8; 32];
        let nonce = random_nonce();
        let mut ct = sealer.seal(&key, &nonce, b"payload", b"ad").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        let err = sealer.open(&key, &nonce, &ct, b"ad").unwrap_err();
        assert!(matches!(err, AuthError::TagMismatch));
    }
}
