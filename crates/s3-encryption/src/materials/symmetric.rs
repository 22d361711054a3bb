//! [`SymmetricMaterials`]: envelope keys wrapped under a locally held AES-256 key.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant,
//! so a repeated wrap nonce degrades to revealing equality of two wrapped keys
//! instead of breaking the master key.
//!
//! # Wrapped key format
//!
//! ```text
//! nonce (12 bytes) || AES-256-GCM-SIV(master, nonce, aad = cek-alg, envelope key) || tag (16 bytes)
//! ```
//!
//! Binding the content-cipher id as AAD means a wrapped key cannot be
//! replayed under an instruction that names a different cipher.

use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{ContentCipher, MaterialDescription, WrapAlgorithm};
use zeroize::Zeroizing;

use super::{EncryptionMaterials, MaterialsError};
use crate::crypto::EnvelopeKey;

/// Byte length of the master key (32 bytes = 256 bits).
pub const MASTER_KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

const TAG_LEN: usize = 16;

/// Materials backed by a symmetric master key held in process memory.
#[derive(Clone)]
pub struct SymmetricMaterials {
    master: Aes256GcmSiv,
    description: MaterialDescription,
}

impl SymmetricMaterials {
    /// Build materials from raw master key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialsError::InvalidKeyLength`] if `master_key` is not
    /// [`MASTER_KEY_LEN`] bytes.
    pub fn new(master_key: &[u8]) -> Result<Self, MaterialsError> {
        if master_key.len() != MASTER_KEY_LEN {
            return Err(MaterialsError::InvalidKeyLength(master_key.len()));
        }
        let master = Aes256GcmSiv::new_from_slice(master_key)
            .map_err(|_| MaterialsError::InvalidKeyLength(master_key.len()))?;
        Ok(Self {
            master,
            description: MaterialDescription::new(),
        })
    }

    /// Build materials from a standard-base64 encoded master key.
    ///
    /// # Errors
    ///
    /// Returns [`MaterialsError::InvalidEncoding`] if `encoded` is not valid
    /// base64, or [`MaterialsError::InvalidKeyLength`] if it decodes to the
    /// wrong length.
    pub fn from_base64(encoded: &str) -> Result<Self, MaterialsError> {
        let raw = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| MaterialsError::InvalidEncoding(e.to_string()))?,
        );
        Self::new(&raw)
    }

    /// Attach a description recorded in every instruction this wraps for.
    pub fn with_description(mut self, description: MaterialDescription) -> Self {
        self.description = description;
        self
    }
}

impl std::fmt::Debug for SymmetricMaterials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricMaterials")
            .field("master", &"[REDACTED]")
            .field("description", &self.description)
            .finish()
    }
}

#[async_trait]
impl EncryptionMaterials for SymmetricMaterials {
    fn wrap_algorithm(&self) -> WrapAlgorithm {
        WrapAlgorithm::AesGcmSiv
    }

    fn description(&self) -> MaterialDescription {
        self.description.clone()
    }

    async fn wrap_key(&self, key: &EnvelopeKey) -> Result<Vec<u8>, MaterialsError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .master
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: key.key_bytes(),
                    aad: key.cipher().as_str().as_bytes(),
                },
            )
            .map_err(|_| MaterialsError::Wrap("AES-GCM-SIV wrap failed".into()))?;

        let mut wrapped = Vec::with_capacity(NONCE_LEN + sealed.len());
        wrapped.extend_from_slice(&nonce);
        wrapped.extend_from_slice(&sealed);
        Ok(wrapped)
    }

    async fn unwrap_key(
        &self,
        wrapped: &[u8],
        cipher: ContentCipher,
    ) -> Result<Zeroizing<Vec<u8>>, MaterialsError> {
        if wrapped.len() < NONCE_LEN + TAG_LEN {
            return Err(MaterialsError::Unwrap(format!(
                "wrapped key too short: {} bytes",
                wrapped.len()
            )));
        }
        let (nonce, sealed) = wrapped.split_at(NONCE_LEN);
        self.master
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: sealed,
                    aad: cipher.as_str().as_bytes(),
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| MaterialsError::Unwrap("AES-GCM-SIV unwrap failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_master() -> Vec<u8> {
        let mut key = vec![0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    #[tokio::test]
    async fn wrap_unwrap_round_trip() {
        let materials = SymmetricMaterials::new(&random_master()).unwrap();
        let key = EnvelopeKey::generate(ContentCipher::AesGcm);
        let wrapped = materials.wrap_key(&key).await.unwrap();
        assert_eq!(wrapped.len(), NONCE_LEN + MASTER_KEY_LEN + TAG_LEN);
        let raw = materials
            .unwrap_key(&wrapped, ContentCipher::AesGcm)
            .await
            .unwrap();
        assert_eq!(raw.as_slice(), key.key_bytes());
    }

    #[tokio::test]
    async fn wrong_master_key_fails_unwrap() {
        let a = SymmetricMaterials::new(&random_master()).unwrap();
        let b = SymmetricMaterials::new(&random_master()).unwrap();
        let key = EnvelopeKey::generate(ContentCipher::AesGcm);
        let wrapped = a.wrap_key(&key).await.unwrap();
        assert!(b.unwrap_key(&wrapped, ContentCipher::AesGcm).await.is_err());
    }

    #[tokio::test]
    async fn cipher_is_bound_to_wrapped_key() {
        let materials = SymmetricMaterials::new(&random_master()).unwrap();
        let key = EnvelopeKey::generate(ContentCipher::AesGcm);
        let wrapped = materials.wrap_key(&key).await.unwrap();
        assert!(materials
            .unwrap_key(&wrapped, ContentCipher::AesCtr)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn rejects_truncated_blob() {
        let materials = SymmetricMaterials::new(&random_master()).unwrap();
        let err = materials
            .unwrap_key(&[0u8; 20], ContentCipher::AesGcm)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(matches!(
            SymmetricMaterials::new(&[0u8; 16]),
            Err(MaterialsError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn from_base64_decodes_master_key() {
        let encoded = STANDARD.encode(random_master());
        assert!(SymmetricMaterials::from_base64(&encoded).is_ok());
        assert!(matches!(
            SymmetricMaterials::from_base64("not base64!"),
            Err(MaterialsError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn debug_is_redacted() {
        let materials = SymmetricMaterials::new(&random_master()).unwrap();
        assert!(format!("{materials:?}").contains("REDACTED"));
    }
}
