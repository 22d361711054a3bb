//! [`KmsMaterials`]: envelope keys wrapped by AWS KMS.
//!
//! The envelope key is generated locally and sent to KMS `Encrypt`; reads call
//! KMS `Decrypt`. Both calls carry the encryption context
//! `aws:x-amz-cek-alg = <content cipher>`, so KMS refuses to unwrap a key
//! under an instruction that names a different cipher.
//!
//! # Security invariants
//!
//! - The plaintext envelope key is never logged or included in traces.
//! - Access control is entirely KMS key policy; this type holds no secrets.

use async_trait::async_trait;
use aws_sdk_kms::{error::DisplayErrorContext, primitives::Blob};
use common::{ContentCipher, MaterialDescription, WrapAlgorithm};
use tracing::debug;
use zeroize::Zeroizing;

use super::{EncryptionMaterials, MaterialsError};
use crate::crypto::EnvelopeKey;

/// Encryption-context key binding a wrapped key to its content cipher.
pub const CEK_CONTEXT_KEY: &str = "aws:x-amz-cek-alg";

/// Material-description key recording which KMS key wrapped the envelope key.
pub const KMS_KEY_DESCRIPTION: &str = "kms_cmk_id";

/// Materials that delegate key wrapping to an AWS KMS key.
#[derive(Clone, Debug)]
pub struct KmsMaterials {
    client: aws_sdk_kms::Client,
    key_id: String,
}

impl KmsMaterials {
    /// Create materials for the KMS key `key_id` (key id, ARN, or alias).
    pub fn new(client: aws_sdk_kms::Client, key_id: impl Into<String>) -> Self {
        Self {
            client,
            key_id: key_id.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[async_trait]
impl EncryptionMaterials for KmsMaterials {
    fn wrap_algorithm(&self) -> WrapAlgorithm {
        WrapAlgorithm::KmsContext
    }

    fn description(&self) -> MaterialDescription {
        let mut description = MaterialDescription::new();
        description.insert(KMS_KEY_DESCRIPTION.into(), self.key_id.clone());
        description
    }

    async fn wrap_key(&self, key: &EnvelopeKey) -> Result<Vec<u8>, MaterialsError> {
        // The SDK owns this copy of the key until the request is dropped and
        // `Blob` cannot be zeroized; it lives only for the duration of `send`.
        let resp = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(key.key_bytes().to_vec()))
            .encryption_context(CEK_CONTEXT_KEY, key.cipher().as_str())
            .send()
            .await
            .map_err(|e| MaterialsError::Kms(DisplayErrorContext(&e).to_string()))?;

        let wrapped = resp
            .ciphertext_blob()
            .ok_or_else(|| MaterialsError::Wrap("KMS encrypt response contained no ciphertext".into()))?
            .as_ref()
            .to_vec();

        debug!(key_id = %self.key_id, "envelope key wrapped via KMS");
        Ok(wrapped)
    }

    async fn unwrap_key(
        &self,
        wrapped: &[u8],
        cipher: ContentCipher,
    ) -> Result<Zeroizing<Vec<u8>>, MaterialsError> {
        let mut resp = self
            .client
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(wrapped.to_vec()))
            .encryption_context(CEK_CONTEXT_KEY, cipher.as_str())
            .send()
            .await
            .map_err(|e| MaterialsError::Kms(DisplayErrorContext(&e).to_string()))?;

        let plaintext = take_plaintext(resp.plaintext.take())?;
        debug!(key_id = %self.key_id, "envelope key unwrapped via KMS");
        Ok(plaintext)
    }
}

/// Move the unwrapped key out of the response blob without copying it.
fn take_plaintext(blob: Option<Blob>) -> Result<Zeroizing<Vec<u8>>, MaterialsError> {
    blob.map(|b| Zeroizing::new(b.into_inner()))
        .ok_or_else(|| MaterialsError::Unwrap("KMS decrypt response contained no plaintext".into()))
}
