//! KeyTransport — pass-through (content-keyed) or asymmetric-wrap (RSA-OAEP).
//!
//! `ContentDerived` is the default: the bulk key is never transmitted,
//! only re-derived by both sides via [`crate::kdf`]. `RsaOaep` is V3's
//! opt-in asymmetric variant — a random 32-byte DEK is generated, used
//! directly as the AEAD key, and wrapped under the recipient's RSA public
//! key. Grounded on the `rsa` crate usage in `mrcord77-rust_citadel`'s
//! dev-dependencies (RSA interop testing), generalized here into the
//! actual transport rather than a test fixture.

use rand::rngs::OsRng;
use rsa::pkcs1v15::{SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("RSA-OAEP wrap failed: {0}")]
    WrapFailed(String),
    #[error("RSA-OAEP unwrap failed: {0}")]
    UnwrapFailed(String),
    #[error("RSA-PSS signing failed: {0}")]
    SignFailed(String),
    #[error("RSA-PSS signature verification failed")]
    SignatureInvalid,
    #[error("content-derived transport does not wrap or unwrap a DEK")]
    NotApplicable,
}

/// A 32-byte data encryption key. Zeroized on drop — it is the one secret
/// this engine ever holds in memory.
pub type Dek = Zeroizing<[u8; 32]>;

pub trait KeyTransport: Send + Sync {
    /// Returns `None` when the transport has nothing to persist (content-derived).
    fn wrap(&self, dek: &[u8; 32]) -> Result<Option<Vec<u8>>, CryptoError>;
    fn unwrap(&self, wrapped: &[u8]) -> Result<[u8; 32], CryptoError>;
    /// `true` when the transport needs a fresh random DEK rather than reusing
    /// the content-derived key directly (asymmetric transports only).
    fn requires_random_dek(&self) -> bool;
}

/// Content-derived transport: `wrap` writes nothing, `unwrap` is never
/// called (the unpacker re-derives the key via HKDF instead).
pub struct ContentDerived;
impl KeyTransport for ContentDerived {
    fn wrap(&self, _dek: &[u8; 32]) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(None)
    }
    fn unwrap(&self, _wrapped: &[u8]) -> Result<[u8; 32], CryptoError> {
        Err(CryptoError::NotApplicable)
    }
    fn requires_random_dek(&self) -> bool {
        false
    }
}

/// RSA-OAEP-SHA256 asymmetric transport, V3 only.
pub struct RsaOaep {
    pub recipient_public_key: Option<RsaPublicKey>,
    pub recipient_private_key: Option<RsaPrivateKey>,
}

impl RsaOaep {
    pub fn for_packing(recipient_public_key: RsaPublicKey) -> Self {
        Self { recipient_public_key: Some(recipient_public_key), recipient_private_key: None }
    }

    pub fn for_unpacking(recipient_private_key: RsaPrivateKey) -> Self {
        Self { recipient_public_key: None, recipient_private_key: Some(recipient_private_key) }
    }
}

impl KeyTransport for RsaOaep {
    fn wrap(&self, dek: &[u8; 32]) -> Result<Option<Vec<u8>>, CryptoError> {
        let pubkey = self
            .recipient_public_key
            .as_ref()
            .ok_or_else(|| CryptoError::WrapFailed("no recipient public key".into()))?;
        let mut rng = OsRng;
        let wrapped = pubkey
            .encrypt(&mut rng, Oaep::new::<Sha256>(), dek.as_slice())
            .map_err(|e| CryptoError::WrapFailed(e.to_string()))?;
        Ok(Some(wrapped))
    }

    fn unwrap(&self, wrapped: &[u8]) -> Result<[u8; 32], CryptoError> {
        let privkey = self
            .recipient_private_key
            .as_ref()
            .ok_or_else(|| CryptoError::UnwrapFailed("no recipient private key".into()))?;
        let dek = privkey
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|e| CryptoError::UnwrapFailed(e.to_string()))?;
        dek.try_into()
            .map_err(|_| CryptoError::UnwrapFailed("unwrapped DEK is not 32 bytes".into()))
    }

    fn requires_random_dek(&self) -> bool {
        true
    }
}

/// Signs the canonical metadata bytes with RSA-PSS-SHA256. Optional in V3.
pub fn sign_metadata(private_key: &RsaPrivateKey, metadata_bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let mut rng = OsRng;
    let sig = signing_key.sign_with_rng(&mut rng, metadata_bytes);
    Ok(sig.to_vec())
}

/// Verifies a metadata signature produced by [`sign_metadata`].
pub fn verify_metadata(
    public_key: &RsaPublicKey,
    metadata_bytes: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let sig = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|_| CryptoError::SignatureInvalid)?;
    verifying_key
        .verify(metadata_bytes, &sig)
        .map_err(|_| CryptoError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    fn keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = OsRng;
        let priv_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        (priv_key, pub_key)
    }

    #[test]
    fn content_derived_wraps_nothing() {
        let t = ContentDerived;
        assert!(t.wrap(&[0u8; 32]).unwrap().is_none());
        assert!(matches!(t.unwrap(&[]), Err(CryptoError::NotApplicable)));
    }

    #[test]
    fn rsa_oaep_wrap_unwrap_roundtrip() {
        let (priv_key, pub_key) = keypair();
        let dek = [42u8; 32];
        let packer_side = RsaOaep::for_packing(pub_key);
        let wrapped = packer_side.wrap(&dek).unwrap().unwrap();

        let unpacker_side = RsaOaep::for_unpacking(priv_key);
        let recovered = unpacker_side.unwrap(&wrapped).unwrap();
        assert_eq!(recovered, dek);
    }

    #[test]
    fn rsa_oaep_wrong_key_fails() {
        let (_priv_key, pub_key) = keypair();
        let (other_priv, _) = keypair();
        let dek = [7u8; 32];
        let wrapped = RsaOaep::for_packing(pub_key).wrap(&dek).unwrap().unwrap();
        let err = RsaOaep::for_unpacking(other_priv).unwrap(&wrapped).unwrap_err();
        assert!(matches!(err, CryptoError::UnwrapFailed(_)));
    }

    #[test]
    fn metadata_signature_roundtrip() {
        let (priv_key, pub_key) = keypair();
        let metadata = b"{\"version\":3}";
        let sig = sign_metadata(&priv_key, metadata).unwrap();
        verify_metadata(&pub_key, metadata, &sig).unwrap();
    }

    #[test]
    fn metadata_signature_rejects_tampered_bytes() {
        let (priv_key, pub_key) = keypair();
        let metadata = b"{\"version\":3}";
        let sig = sign_metadata(&priv_key, metadata).unwrap();
        let err = verify_metadata(&pub_key, b"{\"version\":4}", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::SignatureInvalid));
    }
}
