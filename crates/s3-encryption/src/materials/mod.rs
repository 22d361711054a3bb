//! Key-management collaborators that wrap and unwrap envelope keys.
//!
//! The client holds one `Arc<dyn EncryptionMaterials>` and shares it across
//! every in-flight request, so implementations must be safe to call
//! concurrently. Both bundled implementations are stateless after
//! construction.

pub mod kms;
pub mod symmetric;

pub use kms::KmsMaterials;
pub use symmetric::SymmetricMaterials;

use async_trait::async_trait;
use common::{ContentCipher, MaterialDescription, WrapAlgorithm};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::EnvelopeKey;

/// Errors produced by an [`EncryptionMaterials`] implementation.
#[derive(Debug, Error)]
pub enum MaterialsError {
    /// The master key is not a 256-bit key.
    #[error("invalid master key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The master key could not be decoded.
    #[error("invalid master key encoding: {0}")]
    InvalidEncoding(String),

    /// Wrapping the envelope key failed.
    #[error("{0}")]
    Wrap(String),

    /// Unwrapping failed: wrong master key, tampered blob, or wrong context.
    #[error("{0}")]
    Unwrap(String),

    /// The key-management service rejected or failed the request.
    #[error("KMS request failed: {0}")]
    Kms(String),
}

/// Supplies envelope keys and protects them under a master key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EncryptionMaterials: Send + Sync {
    /// Identifier recorded in the instruction so a reader can tell which
    /// materials are needed.
    fn wrap_algorithm(&self) -> WrapAlgorithm;

    /// Description stored alongside the wrapped key.
    fn description(&self) -> MaterialDescription {
        MaterialDescription::new()
    }

    /// Produce a fresh envelope key for one object.
    async fn provide_envelope_key(
        &self,
        cipher: ContentCipher,
    ) -> Result<EnvelopeKey, MaterialsError> {
        Ok(EnvelopeKey::generate(cipher))
    }

    /// Wrap `key` so it can be persisted next to the object.
    async fn wrap_key(&self, key: &EnvelopeKey) -> Result<Vec<u8>, MaterialsError>;

    /// Recover the raw key bytes from a wrapped key written for `cipher`.
    async fn unwrap_key(
        &self,
        wrapped: &[u8],
        cipher: ContentCipher,
    ) -> Result<Zeroizing<Vec<u8>>, MaterialsError>;
}
