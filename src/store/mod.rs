//! Streaming bridge between HTTP bodies and object storage.
//!
//! ```text
//!  endpoint ── FileWriter ──▶ [bounded channel] ──▶ upload task ──▶ ObjectStorage
//!                                                      │
//!                                                      └──▶ FileRecords (PENDING → VALID)
//!
//!  ObjectStorage ──▶ download task ──▶ [bounded channel] ──▶ FileReader ── endpoint
//! ```
//!
//! Every [`FileStore::create`] and [`FileStore::open`] spawns exactly one task
//! bound to exactly one channel. The collaborators are the only shared state.
//!
//! A file record is written `PENDING` before any byte moves and is marked
//! `VALID` once, after the backend confirmed the upload. If that update fails
//! the writer reports failure even though the object exists: a file whose
//! record was never confirmed is not handed out as stored.

mod object;
mod pipe;
mod records;
mod s3;

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub use object::{MemoryObjectStorage, ObjectBody, ObjectStorage, StorageError};
pub use pipe::{FileReader, FileWriter};
pub use records::{FileRecords, FileStatus, MemoryFileRecords, PgFileRecords, RecordError};
pub use s3::S3ObjectStorage;

use pipe::{Outcome, Segment, upload_body};

/// Largest chunk a download task sends through the pipe at once.
const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Opaque system identity of a stored file.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for FileId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A failed upload or download, as seen through a pipe end.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("unable to persist file record: {0}")]
    Record(#[source] RecordError),
    #[error("unable to put object into storage: {0}")]
    Upload(#[source] StorageError),
    #[error("unable to fetch object from storage: {0}")]
    Download(#[source] StorageError),
    #[error("object is {size} bytes, larger than the {limit} byte download limit")]
    TooLarge { size: usize, limit: usize },
    #[error("object key must not be empty")]
    EmptyKey,
    #[error("transfer worker stopped before reporting an outcome")]
    WorkerStopped,
}

impl TransferError {
    /// The transfer failure carried by an error a pipe end returned, if any.
    pub fn from_io(err: &io::Error) -> Option<&TransferError> {
        err.get_ref()?.downcast_ref::<Arc<TransferError>>().map(|e| &**e)
    }

    /// Whether the backend had nothing stored under the key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Download(StorageError::NotFound(_)))
    }
}

/// Tuning for [`FileStore`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StoreOptions {
    /// Chunks buffered between a pipe end and its worker. At least 1.
    pub pipe_capacity: usize,
    /// Largest object a download may buffer in memory.
    pub max_download_bytes: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { pipe_capacity: 16, max_download_bytes: 10 * 1024 * 1024 }
    }
}

/// Creates and opens stored files.
///
/// Cheap to clone; clones share the collaborators.
#[derive(Clone)]
pub struct FileStore {
    records: Arc<dyn FileRecords>,
    objects: Arc<dyn ObjectStorage>,
    options: StoreOptions,
}

impl FileStore {
    pub fn new(records: Arc<dyn FileRecords>, objects: Arc<dyn ObjectStorage>, options: StoreOptions) -> Self {
        Self { records, objects, options }
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Starts an upload of a new file under `directory`.
    ///
    /// The record is persisted `PENDING` before this returns; if that fails
    /// nothing else happens. Otherwise the upload task is already running and
    /// the returned writer feeds it. See [`FileWriter`] for how to finish.
    pub async fn create(&self, content_type: &str, directory: &str) -> Result<(FileId, FileWriter), TransferError> {
        let id = FileId::new();
        self.records
            .create_file(&id, FileStatus::Pending)
            .await
            .map_err(TransferError::Record)?;

        let key = object_key(directory, &id);
        let (sender, receiver) = mpsc::channel(self.options.pipe_capacity.max(1));
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let records = Arc::clone(&self.records);
        let objects = Arc::clone(&self.objects);
        let task_key = key.clone();
        let content_type = content_type.to_owned();

        tokio::spawn(async move {
            let outcome = upload(records, objects, id, &task_key, &content_type, receiver).await;
            match &outcome {
                Ok(()) => debug!(file_id = %id, key = %task_key, "file stored"),
                Err(e) => error!(file_id = %id, key = %task_key, error = %e, "file upload failed"),
            }
            // The writer may already be gone; the record stays PENDING then.
            let _ = outcome_tx.send(outcome);
        });

        Ok((id, FileWriter::new(id, key, sender, outcome_rx)))
    }

    /// Opens a stored object for reading.
    ///
    /// Returns immediately; the download runs in the background and any
    /// failure is reported by the reader.
    pub fn open(&self, key: &str) -> Result<FileReader, TransferError> {
        let key = key.trim_matches('/');
        if key.is_empty() {
            return Err(TransferError::EmptyKey);
        }

        let (sender, receiver) = mpsc::channel(self.options.pipe_capacity.max(1));
        let objects = Arc::clone(&self.objects);
        let limit = self.options.max_download_bytes;
        let key = key.to_owned();

        tokio::spawn(async move {
            let bytes = match objects.download(&key).await {
                Ok(bytes) if bytes.len() > limit => Err(TransferError::TooLarge { size: bytes.len(), limit }),
                Ok(bytes) => Ok(bytes),
                Err(e) => Err(TransferError::Download(e)),
            };
            let bytes = match bytes {
                Ok(bytes) => bytes,
                Err(e) if e.is_not_found() => {
                    warn!(key = %key, "no object stored under key");
                    let _ = sender.send(Err(Arc::new(e))).await;
                    return;
                }
                Err(e) => {
                    error!(key = %key, error = %e, "file download failed");
                    let _ = sender.send(Err(Arc::new(e))).await;
                    return;
                }
            };

            debug!(key = %key, size = bytes.len(), "file downloaded");
            for chunk in chunks(bytes) {
                if sender.send(Ok(Segment::Data(chunk))).await.is_err() {
                    debug!(key = %key, "reader dropped before the download was consumed");
                    return;
                }
            }
            let _ = sender.send(Ok(Segment::End)).await;
        });

        Ok(FileReader::new(receiver))
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore").field("options", &self.options).finish_non_exhaustive()
    }
}

async fn upload(
    records: Arc<dyn FileRecords>,
    objects: Arc<dyn ObjectStorage>,
    id: FileId,
    key: &str,
    content_type: &str,
    receiver: mpsc::Receiver<Segment>,
) -> Outcome {
    objects
        .upload(key, content_type, upload_body(receiver))
        .await
        .map_err(TransferError::Upload)?;
    records
        .update_status(&id, FileStatus::Valid)
        .await
        .map_err(TransferError::Record)
}

/// `directory/id`, or just `id` for an empty directory.
fn object_key(directory: &str, id: &FileId) -> String {
    let directory = directory.trim_matches('/');
    if directory.is_empty() {
        id.to_string()
    } else {
        format!("{directory}/{id}")
    }
}

fn chunks(mut bytes: Bytes) -> impl Iterator<Item = Bytes> {
    std::iter::from_fn(move || {
        if bytes.is_empty() {
            return None;
        }
        let n = bytes.len().min(DOWNLOAD_CHUNK_BYTES);
        Some(bytes.split_to(n))
    })
}

#[cfg(test)]
mod tests;
