//! [`MemoryStore`]: an in-process [`ObjectStore`] for tests and local runs.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{TransportError, TransportErrorKind};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::{Metadata, ObjectStore, PutResult, StoredObject};

#[derive(Debug, Clone)]
struct Entry {
    body: Bytes,
    metadata: Metadata,
    e_tag: String,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, Entry>,
    failing_put_suffixes: Vec<String>,
}

/// Thread-safe map of key to object. Clones share the same contents.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every PUT whose key ends with `suffix` fail with a service error.
    pub async fn fail_puts_ending_with(&self, suffix: impl Into<String>) {
        self.inner.write().await.failing_put_suffixes.push(suffix.into());
    }

    /// Raw stored bytes of `key`, exactly as written.
    pub async fn raw_body(&self, key: &str) -> Option<Bytes> {
        self.inner.read().await.objects.get(key).map(|e| e.body.clone())
    }

    /// Stored metadata of `key`.
    pub async fn metadata(&self, key: &str) -> Option<Metadata> {
        self.inner
            .read()
            .await
            .objects
            .get(key)
            .map(|e| e.metadata.clone())
    }

    /// Overwrite the stored body of `key` without touching its metadata.
    ///
    /// Returns `false` if the key does not exist.
    pub async fn replace_body(&self, key: &str, body: impl Into<Bytes>) -> bool {
        match self.inner.write().await.objects.get_mut(key) {
            Some(entry) => {
                entry.body = body.into();
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.read().await.objects.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        metadata: Metadata,
    ) -> Result<PutResult, TransportError> {
        let mut inner = self.inner.write().await;
        if inner
            .failing_put_suffixes
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()))
        {
            return Err(TransportError::new(
                TransportErrorKind::Service,
                format!("put `{key}` failed: injected fault"),
            ));
        }
        let e_tag = format!("{:x}", Sha256::digest(&body));
        inner.objects.insert(
            key.to_owned(),
            Entry {
                body,
                metadata,
                e_tag: e_tag.clone(),
            },
        );
        Ok(PutResult {
            e_tag: Some(e_tag),
            version_id: None,
        })
    }

    async fn get_object(&self, key: &str) -> Result<StoredObject, TransportError> {
        let entry = self
            .inner
            .read()
            .await
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| TransportError::not_found(format!("get `{key}` failed: NoSuchKey")))?;

        Ok(StoredObject {
            content_length: Some(entry.body.len() as u64),
            body: Box::new(Cursor::new(entry.body)),
            metadata: entry.metadata,
            e_tag: Some(entry.e_tag),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryStore::new();
        let mut metadata = Metadata::new();
        metadata.insert("owner".into(), "alice".into());
        let put = store
            .put_object("a", Bytes::from_static(b"body"), metadata)
            .await
            .unwrap();
        assert!(put.e_tag.is_some());

        let mut obj = store.get_object("a").await.unwrap();
        let mut body = Vec::new();
        obj.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"body");
        assert_eq!(obj.metadata["owner"], "alice");
        assert_eq!(obj.content_length, Some(4));
        assert_eq!(obj.e_tag, put.e_tag);
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_object("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn injected_put_fault() {
        let store = MemoryStore::new();
        store.fail_puts_ending_with(".instruction").await;
        assert!(store
            .put_object("k", Bytes::new(), Metadata::new())
            .await
            .is_ok());
        let err = store
            .put_object("k.instruction", Bytes::new(), Metadata::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Service);
        assert!(!store.contains("k.instruction").await);
        assert_eq!(store.len().await, 1);
    }
}
