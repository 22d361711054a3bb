//! Client-side envelope encryption for S3-compatible object storage.
//!
//! Every object is encrypted under its own envelope key before it leaves the
//! process. The envelope key is wrapped by an [`EncryptionMaterials`]
//! implementation and stored beside the ciphertext as an
//! [`EncryptionInstruction`], either in object metadata or in a separate
//! `<key>.instruction` object.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use s3_encryption::{
//!     CryptoConfiguration, EncryptionClient, GetObjectRequest, MemoryStore, PutObjectRequest,
//!     SymmetricMaterials,
//! };
//!
//! let client = EncryptionClient::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(SymmetricMaterials::new(&[7u8; 32])?),
//!     CryptoConfiguration::default(),
//! );
//! client.put_object(PutObjectRequest::new("greeting", "hello world")).await?;
//! let object = client.get_object(GetObjectRequest::new("greeting")).await?;
//! assert_eq!(&object.body[..], b"hello world");
//! # Ok(())
//! # }
//! ```

pub mod aws;
pub mod client;
pub mod config;
pub mod crypto;
pub mod materials;
pub mod modules;
pub mod storage;
pub mod telemetry;

pub use client::{
    EncryptionClient, GetObjectOutcome, GetObjectRequest, GetObjectResult, PutObjectOutcome,
    PutObjectRequest,
};
pub use common::{
    ConsistencyError, ContentCipher, CryptoError, EncryptionError, EncryptionInstruction,
    ErrorDomain, TransportError, TransportErrorKind, WrapAlgorithm,
};
pub use config::{CryptoConfiguration, CryptoMode, Settings, StorageMode};
pub use materials::{EncryptionMaterials, KmsMaterials, MaterialsError, SymmetricMaterials};
pub use modules::{CryptoModule, CryptoModuleFactory};
pub use storage::{MemoryStore, ObjectStore, PutResult, S3Store};
