//! [`EncryptionClient`]: transparent encrypt-on-put and decrypt-on-get.
//!
//! # Request lifecycle
//!
//! ```text
//! Idle -> KeyMaterialResolving -> Encrypting | Decrypting -> StorageIO -> Done
//!   \__________________________________________________________________-> Failed
//! ```
//!
//! Nothing is retried here; retries belong to the [`ObjectStore`].
//!
//! # Instruction-file writes are not atomic
//!
//! In [`StorageMode::InstructionFile`] a PUT writes the data object and then
//! its instruction object. If the second write fails, the data object stays
//! behind without any way to decrypt it. That outcome is returned as
//! [`ConsistencyError::OrphanedObject`]; no cleanup is attempted.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use common::protocol::{instruction_key, INSTRUCTION_FILE_HEADER, INSTRUCTION_SUFFIX, RESERVED_HEADERS};
use common::{ConsistencyError, CryptoError, EncryptionError, EncryptionInstruction, TransportError};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{CryptoConfiguration, StorageMode};
use crate::crypto::ciphertext_len;
use crate::materials::EncryptionMaterials;
use crate::modules::CryptoModuleFactory;
use crate::storage::{Metadata, ObjectStore, PutResult, StoredObject};

/// Upper bound on an instruction object's size.
const MAX_INSTRUCTION_LEN: u64 = 64 * 1024;

/// Upper bound on the plaintext buffer reserved up front from untrusted metadata.
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

pub type PutObjectOutcome = Result<PutResult, EncryptionError>;
pub type GetObjectOutcome = Result<GetObjectResult, EncryptionError>;

/// An object to encrypt and upload.
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub key: String,
    pub body: Bytes,
    pub metadata: Metadata,
}

impl PutObjectRequest {
    pub fn new(key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            metadata: Metadata::new(),
        }
    }

    /// Add a user metadata entry stored unencrypted on the data object.
    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }
}

/// An object to download and decrypt.
#[derive(Debug, Clone)]
pub struct GetObjectRequest {
    pub key: String,
}

impl GetObjectRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// A fully verified, decrypted object.
#[derive(Debug, Clone)]
pub struct GetObjectResult {
    pub body: Bytes,
    /// Metadata of the data object as returned by the store.
    pub metadata: Metadata,
    pub e_tag: Option<String>,
    /// Plaintext length in bytes.
    pub content_length: u64,
}

/// Encrypting front end for an [`ObjectStore`].
///
/// Cheap to clone; clones share the store, the materials, and the policy.
#[derive(Clone)]
pub struct EncryptionClient {
    store: Arc<dyn ObjectStore>,
    materials: Arc<dyn EncryptionMaterials>,
    config: CryptoConfiguration,
}

impl EncryptionClient {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        materials: Arc<dyn EncryptionMaterials>,
        config: CryptoConfiguration,
    ) -> Self {
        Self {
            store,
            materials,
            config,
        }
    }

    pub fn config(&self) -> &CryptoConfiguration {
        &self.config
    }

    /// Multipart uploads would split an authenticated body across
    /// independently uploaded parts, so this client never offers them.
    pub fn multipart_upload_supported(&self) -> bool {
        false
    }

    /// Encrypt `request.body` and store it with its instruction.
    ///
    /// # Errors
    ///
    /// - [`EncryptionError::InvalidRequest`] for an empty key, a key ending in
    ///   `.instruction`, or metadata using a reserved instruction key.
    /// - [`EncryptionError::Crypto`] if the envelope key cannot be wrapped.
    /// - [`EncryptionError::Transport`] if the data object write fails.
    /// - [`EncryptionError::Consistency`] if the data object was written but
    ///   the instruction object was not.
    pub async fn put_object(&self, request: PutObjectRequest) -> PutObjectOutcome {
        validate_put(&request)?;
        let PutObjectRequest {
            key,
            body,
            metadata,
        } = request;

        let module = CryptoModuleFactory::select(&self.config);
        debug!(key = %key, cipher = %module.content_cipher(), "encrypting object");

        let expected = ciphertext_len(module.content_cipher(), body.len() as u64);
        let mut ciphertext = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
        let instruction = module
            .encrypt(&mut &body[..], &mut ciphertext, self.materials.as_ref())
            .await?;
        let ciphertext = Bytes::from(ciphertext);
        let stored_len = ciphertext.len();

        debug!(key = %key, bytes = stored_len, "storing object");
        let result = match self.config.storage_mode {
            StorageMode::ObjectMetadata => {
                let mut metadata = metadata;
                metadata.extend(instruction.to_fields()?);
                self.store.put_object(&key, ciphertext, metadata).await?
            }
            StorageMode::InstructionFile => {
                let document = Bytes::from(instruction.to_json()?);
                let result = self.store.put_object(&key, ciphertext, metadata).await?;
                self.put_instruction(&key, document).await?;
                result
            }
        };

        info!(
            key = %key,
            crypto_mode = ?self.config.crypto_mode,
            storage_mode = ?self.config.storage_mode,
            bytes = stored_len,
            "encrypted object stored"
        );
        Ok(result)
    }

    /// Fetch, verify, and decrypt `request.key`.
    ///
    /// No plaintext is returned unless the whole body decrypted successfully.
    ///
    /// # Errors
    ///
    /// - [`EncryptionError::Consistency`] if the instruction cannot be found
    ///   under the configured storage mode, is unreadable, or names a data
    ///   object that does not exist.
    /// - [`EncryptionError::Crypto`] on unwrap failure, a refused cipher, or an
    ///   authentication failure.
    /// - [`EncryptionError::Transport`] on any other storage failure.
    pub async fn get_object(&self, request: GetObjectRequest) -> GetObjectOutcome {
        let key = request.key;
        if key.is_empty() {
            return Err(EncryptionError::InvalidRequest("object key must not be empty".into()));
        }

        let from_file = match self.config.storage_mode {
            StorageMode::InstructionFile => Some(self.fetch_instruction(&key).await?),
            StorageMode::ObjectMetadata => None,
        };

        let object = match self.store.get_object(&key).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() && from_file.is_some() => {
                return Err(ConsistencyError::DataObjectMissing { key }.into());
            }
            Err(e) => return Err(e.into()),
        };
        let StoredObject {
            mut body,
            metadata,
            e_tag,
            ..
        } = object;

        let instruction = match from_file {
            Some(instruction) => instruction,
            None => EncryptionInstruction::from_metadata(&metadata)?
                .ok_or_else(|| ConsistencyError::InstructionMissing { key: key.clone() })?,
        };

        let module = CryptoModuleFactory::select(&self.config);
        debug!(key = %key, cipher = %instruction.content_cipher, "decrypting object");

        let reserve = instruction
            .unencrypted_content_length
            .unwrap_or(0)
            .min(MAX_PREALLOCATION);
        // Dropped (and zeroed) on every early return below.
        let mut staging = Zeroizing::new(Vec::with_capacity(reserve as usize));
        let written = module
            .decrypt(&mut body, &mut *staging, &instruction, self.materials.as_ref())
            .await?;

        if let Some(expected) = instruction.unencrypted_content_length {
            if expected != written {
                return Err(CryptoError::MalformedInstruction(format!(
                    "plaintext length {written} does not match recorded length {expected}"
                ))
                .into());
            }
        }

        info!(key = %key, bytes = written, "object decrypted");
        Ok(GetObjectResult {
            body: Bytes::from(std::mem::take(&mut *staging)),
            metadata,
            e_tag,
            content_length: written,
        })
    }

    async fn put_instruction(&self, key: &str, document: Bytes) -> Result<(), EncryptionError> {
        let mut marker = Metadata::new();
        marker.insert(INSTRUCTION_FILE_HEADER.into(), String::new());

        match self
            .store
            .put_object(&instruction_key(key), document, marker)
            .await
        {
            Ok(_) => Ok(()),
            Err(source) => {
                warn!(key, error = %source, "instruction write failed; data object is orphaned");
                Err(ConsistencyError::OrphanedObject {
                    key: key.to_owned(),
                    source,
                }
                .into())
            }
        }
    }

    async fn fetch_instruction(&self, key: &str) -> Result<EncryptionInstruction, EncryptionError> {
        debug!(key, "fetching instruction object");
        let mut object = match self.store.get_object(&instruction_key(key)).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => {
                return Err(ConsistencyError::InstructionMissing { key: key.to_owned() }.into());
            }
            Err(e) => return Err(e.into()),
        };

        let mut raw = Vec::new();
        (&mut object.body)
            .take(MAX_INSTRUCTION_LEN)
            .read_to_end(&mut raw)
            .await
            .map_err(|e| TransportError::network(format!("instruction body for `{key}`: {e}")))?;

        let fields: BTreeMap<String, String> =
            serde_json::from_slice(&raw).map_err(|e| ConsistencyError::InstructionUnreadable {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(EncryptionInstruction::from_fields(&fields)?)
    }
}

impl std::fmt::Debug for EncryptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn validate_put(request: &PutObjectRequest) -> Result<(), EncryptionError> {
    if request.key.is_empty() {
        return Err(EncryptionError::InvalidRequest("object key must not be empty".into()));
    }
    if request.key.ends_with(INSTRUCTION_SUFFIX) {
        return Err(EncryptionError::InvalidRequest(format!(
            "object key must not end with `{INSTRUCTION_SUFFIX}`"
        )));
    }
    if let Some(name) = request
        .metadata
        .keys()
        .find(|name| RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
    {
        return Err(EncryptionError::InvalidRequest(format!(
            "metadata key `{name}` is reserved for encryption instructions"
        )));
    }
    Ok(())
}
