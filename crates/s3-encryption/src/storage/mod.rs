//! The storage transport collaborator.
//!
//! The encryption layer only needs whole-object PUT and streaming GET with an
//! open string-keyed metadata map. Retries, signing, and endpoint resolution
//! belong to the implementation behind [`ObjectStore`].

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use common::TransportError;
use tokio::io::AsyncRead;

/// User metadata attached to an object.
pub type Metadata = HashMap<String, String>;

/// A streaming object body.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Result of a successful PUT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutResult {
    pub e_tag: Option<String>,
    pub version_id: Option<String>,
}

/// An object returned by GET. The body has not been read yet.
pub struct StoredObject {
    pub body: BodyReader,
    pub metadata: Metadata,
    pub e_tag: Option<String>,
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("metadata", &self.metadata)
            .field("e_tag", &self.e_tag)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Object storage as seen by the encryption client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object.
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        metadata: Metadata,
    ) -> Result<PutResult, TransportError>;

    /// Open `key` for streaming.
    ///
    /// A missing object is reported as a [`TransportError`] whose kind is
    /// `NotFound`.
    async fn get_object(&self, key: &str) -> Result<StoredObject, TransportError>;
}
