//! Crypto policy and process configuration.
//!
//! [`CryptoConfiguration`] is the immutable policy every client operation runs
//! under. [`Settings`] is the `s3-crypt` process configuration, read from
//! environment variables at startup.

use anyhow::{Context, Result};
use serde::Deserialize;

/// How object bodies are encrypted, and which objects may be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CryptoMode {
    /// Authenticated encryption; refuses to read objects without a tag.
    #[serde(alias = "strict")]
    StrictAuthenticatedEncryption,
    /// Authenticated encryption; still reads legacy encryption-only objects.
    #[serde(alias = "authenticated")]
    AuthenticatedEncryption,
    /// Unauthenticated (CTR) encryption.
    EncryptionOnly,
}

/// Where the encryption instruction is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Instruction fields are user metadata on the data object.
    #[serde(alias = "metadata")]
    ObjectMetadata,
    /// Instruction is a companion object named `<key>.instruction`.
    InstructionFile,
}

/// Immutable crypto policy shared by every operation of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoConfiguration {
    pub crypto_mode: CryptoMode,
    pub storage_mode: StorageMode,
}

impl CryptoConfiguration {
    pub const fn new(crypto_mode: CryptoMode, storage_mode: StorageMode) -> Self {
        Self {
            crypto_mode,
            storage_mode,
        }
    }
}

impl Default for CryptoConfiguration {
    /// Strict authenticated encryption with the instruction in object metadata.
    fn default() -> Self {
        Self::new(
            CryptoMode::StrictAuthenticatedEncryption,
            StorageMode::ObjectMetadata,
        )
    }
}

/// Validated `s3-crypt` configuration.
#[derive(Clone, Deserialize)]
pub struct Settings {
    /// Bucket holding encrypted objects. **Required.**
    pub s3_bucket: String,

    /// Endpoint override for S3-compatible stores (MinIO, LocalStack).
    #[serde(default)]
    pub s3_endpoint_url: Option<String>,

    /// KMS key id, ARN, or alias used to wrap envelope keys.
    #[serde(default)]
    pub kms_key_id: Option<String>,

    /// Base64 AES-256 master key used instead of KMS.
    #[serde(default)]
    pub master_key: Option<String>,

    #[serde(default = "default_crypto_mode")]
    pub crypto_mode: CryptoMode,

    #[serde(default = "default_storage_mode")]
    pub storage_mode: StorageMode,

    /// OTLP endpoint; span export is disabled when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_crypto_mode() -> CryptoMode {
    CryptoMode::StrictAuthenticatedEncryption
}
fn default_storage_mode() -> StorageMode {
    StorageMode::ObjectMetadata
}
fn default_log_level() -> String {
    "info".into()
}

impl Settings {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let s: Settings = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        s.validate()?;
        Ok(s)
    }

    /// The crypto policy selected by `CRYPTO_MODE` and `STORAGE_MODE`.
    pub fn crypto_configuration(&self) -> CryptoConfiguration {
        CryptoConfiguration::new(self.crypto_mode, self.storage_mode)
    }

    fn validate(&self) -> Result<()> {
        if self.s3_bucket.trim().is_empty() {
            anyhow::bail!("S3_BUCKET is required and must not be empty");
        }
        let kms = self.kms_key_id.as_deref().is_some_and(|k| !k.trim().is_empty());
        let master = self.master_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        match (kms, master) {
            (true, true) => anyhow::bail!("set only one of KMS_KEY_ID and MASTER_KEY"),
            (false, false) => anyhow::bail!("one of KMS_KEY_ID or MASTER_KEY is required"),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_endpoint_url", &self.s3_endpoint_url)
            .field("kms_key_id", &self.kms_key_id)
            .field("master_key", &self.master_key.as_ref().map(|_| "[REDACTED]"))
            .field("crypto_mode", &self.crypto_mode)
            .field("storage_mode", &self.storage_mode)
            .field("otel_exporter_otlp_endpoint", &self.otel_exporter_otlp_endpoint)
            .field("log_level", &self.log_level)
            .finish()
    }
}
