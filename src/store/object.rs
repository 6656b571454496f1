//! Object storage client interface and the in-process implementation.

use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use futures::stream::BoxStream;
use parking_lot::RwLock;

/// The body of an upload. Ends with an `Err` if the producer aborted.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload body failed: {0}")]
    Body(#[source] io::Error),
    #[error("no object stored under `{0}`")]
    NotFound(String),
    #[error("object exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A latency-bound object store.
///
/// Shared by every concurrent transfer, so implementations must tolerate
/// independent concurrent calls. Timeouts are the implementation's business.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Stores everything `body` yields under `key`.
    ///
    /// Must fail, and must not store the object, if `body` yields an error.
    async fn upload(&self, key: &str, content_type: &str, body: ObjectBody) -> Result<(), StorageError>;

    async fn download(&self, key: &str) -> Result<Bytes, StorageError>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    content_type: String,
    bytes: Bytes,
}

/// Objects kept in process memory; everything is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).map(|o| o.content_type.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Stores an object directly, bypassing the upload path.
    pub fn insert(&self, key: &str, content_type: &str, bytes: impl Into<Bytes>) {
        let object = StoredObject { content_type: content_type.to_owned(), bytes: bytes.into() };
        self.objects.write().insert(key.to_owned(), object);
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(&self, key: &str, content_type: &str, body: ObjectBody) -> Result<(), StorageError> {
        let bytes = body
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .map_err(StorageError::Body)?;
        self.insert(key, content_type, bytes.freeze());
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        self.objects
            .read()
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_owned()))
    }
}
