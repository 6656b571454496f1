use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{Notify, mpsc};

use super::*;

/// Memory storage that reports every finished upload to the test.
struct Observed {
    inner: MemoryObjectStorage,
    finished: mpsc::UnboundedSender<bool>,
}

#[async_trait]
impl ObjectStorage for Observed {
    async fn upload(&self, key: &str, content_type: &str, body: ObjectBody) -> Result<(), StorageError> {
        let result = self.inner.upload(key, content_type, body).await;
        let _ = self.finished.send(result.is_ok());
        result
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        self.inner.download(key).await
    }
}

/// Refuses every upload after draining the body, and every download.
struct Unavailable;

#[async_trait]
impl ObjectStorage for Unavailable {
    async fn upload(&self, _key: &str, _content_type: &str, mut body: ObjectBody) -> Result<(), StorageError> {
        while futures::StreamExt::next(&mut body).await.is_some() {}
        Err(StorageError::Backend("bucket unavailable".to_owned()))
    }

    async fn download(&self, _key: &str) -> Result<Bytes, StorageError> {
        Err(StorageError::Backend("bucket unavailable".to_owned()))
    }
}

/// Does not start reading the body until the gate opens.
struct Gated {
    inner: MemoryObjectStorage,
    gate: Notify,
}

#[async_trait]
impl ObjectStorage for Gated {
    async fn upload(&self, key: &str, content_type: &str, body: ObjectBody) -> Result<(), StorageError> {
        self.gate.notified().await;
        self.inner.upload(key, content_type, body).await
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        self.inner.download(key).await
    }
}

/// Memory records whose creates or updates can be made to fail.
#[derive(Default)]
struct Flaky {
    inner: MemoryFileRecords,
    fail_create: bool,
    fail_update: bool,
}

#[async_trait]
impl FileRecords for Flaky {
    async fn create_file(&self, id: &FileId, status: FileStatus) -> Result<(), RecordError> {
        if self.fail_create {
            return Err(RecordError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.create_file(id, status).await
    }

    async fn update_status(&self, id: &FileId, status: FileStatus) -> Result<(), RecordError> {
        if self.fail_update {
            return Err(RecordError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.update_status(id, status).await
    }
}

fn observed() -> (Arc<Observed>, mpsc::UnboundedReceiver<bool>) {
    let (finished, rx) = mpsc::unbounded_channel();
    (Arc::new(Observed { inner: MemoryObjectStorage::new(), finished }), rx)
}

fn store(records: Arc<dyn FileRecords>, objects: Arc<dyn ObjectStorage>) -> FileStore {
    FileStore::new(records, objects, StoreOptions { pipe_capacity: 2, max_download_bytes: 1024 })
}

#[tokio::test]
async fn completed_upload_marks_the_record_valid() {
    let records = Arc::new(Flaky::default());
    let (objects, _finished) = observed();
    let store = store(records.clone(), objects.clone());

    let (id, mut writer) = store.create("text/plain", "reports").await.unwrap();
    assert_eq!(records.inner.status(&id), Some(FileStatus::Pending));
    assert_eq!(writer.key(), format!("reports/{id}"));

    writer.write_all(b"mode: set\n").await.unwrap();
    writer.write_all(b"a.go:1.1,2.2 1 1\n").await.unwrap();
    writer.shutdown().await.unwrap();

    assert_eq!(records.inner.status(&id), Some(FileStatus::Valid));
    let stored = objects.inner.download(writer.key()).await.unwrap();
    assert_eq!(&stored[..], b"mode: set\na.go:1.1,2.2 1 1\n");
    assert_eq!(objects.inner.content_type(writer.key()).as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn copy_loop_streams_a_large_body() {
    let records = Arc::new(MemoryFileRecords::new());
    let (objects, _finished) = observed();
    let store = store(records.clone(), objects.clone());

    let body = vec![7u8; 256 * 1024];
    let (id, mut writer) = store.create("application/octet-stream", "").await.unwrap();
    let copied = tokio::io::copy(&mut &body[..], &mut writer).await.unwrap();
    writer.shutdown().await.unwrap();

    assert_eq!(copied, body.len() as u64);
    assert_eq!(writer.key(), id.to_string());
    assert_eq!(objects.inner.download(&id.to_string()).await.unwrap().len(), body.len());
    assert_eq!(records.status(&id), Some(FileStatus::Valid));
}

#[tokio::test]
async fn failed_upload_leaves_the_record_pending() {
    let records = Arc::new(MemoryFileRecords::new());
    let store = store(records.clone(), Arc::new(Unavailable));

    let (id, mut writer) = store.create("text/html", "html").await.unwrap();
    // The backend may fail before or after these bytes are accepted.
    let _ = writer.write_all(b"<html></html>").await;
    let err = writer.shutdown().await.unwrap_err();

    assert!(err.to_string().contains("bucket unavailable"), "{err}");
    assert_eq!(records.status(&id), Some(FileStatus::Pending));
}

#[tokio::test]
async fn failed_status_update_fails_the_transfer() {
    let records = Arc::new(Flaky { fail_update: true, ..Flaky::default() });
    let (objects, _finished) = observed();
    let store = store(records.clone(), objects.clone());

    let (id, mut writer) = store.create("image/svg+xml", "badges").await.unwrap();
    writer.write_all(b"<svg/>").await.unwrap();
    let err = writer.shutdown().await.unwrap_err();

    assert!(err.to_string().contains("file record"), "{err}");
    // The bytes were stored, the record was never confirmed.
    assert!(objects.inner.contains(writer.key()));
    assert_eq!(records.inner.status(&id), Some(FileStatus::Pending));
}

#[tokio::test]
async fn failed_record_creation_moves_no_bytes() {
    let records = Arc::new(Flaky { fail_create: true, ..Flaky::default() });
    let (objects, mut finished) = observed();
    let store = store(records.clone(), objects.clone());

    let err = store.create("text/plain", "reports").await.unwrap_err();
    assert!(matches!(err, TransferError::Record(_)));
    assert!(records.inner.is_empty());
    assert!(finished.try_recv().is_err());
    assert!(objects.inner.is_empty());
}

#[tokio::test]
async fn dropped_writer_aborts_the_upload() {
    let records = Arc::new(MemoryFileRecords::new());
    let (objects, mut finished) = observed();
    let store = store(records.clone(), objects.clone());

    let (id, mut writer) = store.create("text/plain", "reports").await.unwrap();
    writer.write_all(b"mode: set\n").await.unwrap();
    drop(writer);

    assert_eq!(finished.recv().await, Some(false));
    assert!(objects.inner.is_empty());
    assert_eq!(records.status(&id), Some(FileStatus::Pending));
}

#[tokio::test]
async fn writes_block_until_the_backend_consumes() {
    let records = Arc::new(MemoryFileRecords::new());
    let objects = Arc::new(Gated { inner: MemoryObjectStorage::new(), gate: Notify::new() });
    let store = FileStore::new(
        records.clone(),
        objects.clone(),
        StoreOptions { pipe_capacity: 1, max_download_bytes: 1024 },
    );

    let (id, mut writer) = store.create("text/plain", "").await.unwrap();
    writer.write_all(b"first").await.unwrap();

    let blocked = tokio::time::timeout(Duration::from_millis(50), writer.write_all(b"second")).await;
    assert!(blocked.is_err(), "second write should wait for the backend");

    objects.gate.notify_one();
    writer.write_all(b"second").await.unwrap();
    writer.shutdown().await.unwrap();

    assert_eq!(&objects.inner.download(&id.to_string()).await.unwrap()[..], b"firstsecond");
    assert_eq!(records.status(&id), Some(FileStatus::Valid));
}

#[tokio::test]
async fn concurrent_uploads_are_independent() {
    let records = Arc::new(MemoryFileRecords::new());
    let (objects, _finished) = observed();
    let store = store(records.clone(), objects.clone());

    let uploads = (0..8).map(|i| {
        let store = store.clone();
        tokio::spawn(async move {
            let (id, mut writer) = store.create("text/plain", "many").await.unwrap();
            writer.write_all(format!("body {i}").as_bytes()).await.unwrap();
            writer.shutdown().await.unwrap();
            (id, i)
        })
    });

    for upload in uploads.collect::<Vec<_>>() {
        let (id, i) = upload.await.unwrap();
        let stored = objects.inner.download(&format!("many/{id}")).await.unwrap();
        assert_eq!(stored, Bytes::from(format!("body {i}")));
        assert_eq!(records.status(&id), Some(FileStatus::Valid));
    }
}

#[tokio::test]
async fn open_streams_the_stored_object() {
    let objects = Arc::new(MemoryObjectStorage::new());
    let body = "x".repeat(1000);
    objects.insert("reports/1", "text/plain", body.clone());
    let store = store(Arc::new(MemoryFileRecords::new()), objects);

    let mut out = String::new();
    store.open("/reports/1").unwrap().read_to_string(&mut out).await.unwrap();
    assert_eq!(out, body);
}

#[tokio::test]
async fn failed_download_is_reported_on_every_read() {
    let store = store(Arc::new(MemoryFileRecords::new()), Arc::new(Unavailable));
    let mut reader = store.open("reports/1").unwrap();

    let mut buf = [0u8; 16];
    for _ in 0..3 {
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.to_string().contains("bucket unavailable"), "{err}");
    }
}

#[tokio::test]
async fn missing_object_fails_the_read() {
    let store = store(Arc::new(MemoryFileRecords::new()), Arc::new(MemoryObjectStorage::new()));
    let mut out = Vec::new();
    let err = store.open("reports/404").unwrap().read_to_end(&mut out).await.unwrap_err();
    assert!(err.to_string().contains("no object stored"), "{err}");
    assert!(TransferError::from_io(&err).is_some_and(TransferError::is_not_found));
    assert!(out.is_empty());
}

#[tokio::test]
async fn download_above_the_ceiling_fails() {
    let objects = Arc::new(MemoryObjectStorage::new());
    objects.insert("big", "application/octet-stream", vec![0u8; 2048]);
    let store = store(Arc::new(MemoryFileRecords::new()), objects);

    let mut out = Vec::new();
    let err = store.open("big").unwrap().read_to_end(&mut out).await.unwrap_err();
    let transfer = TransferError::from_io(&err).expect("transfer error inside the io error");
    assert!(matches!(transfer, TransferError::TooLarge { size: 2048, limit: 1024 }));
    assert_eq!(err.kind(), io::ErrorKind::Other);
}

#[test]
fn empty_key_is_rejected() {
    let store = store(Arc::new(MemoryFileRecords::new()), Arc::new(MemoryObjectStorage::new()));
    assert!(matches!(store.open("/"), Err(TransferError::EmptyKey)));
}

#[test]
fn object_keys_join_directory_and_id() {
    let id = FileId::new();
    assert_eq!(object_key("reports/", &id), format!("reports/{id}"));
    assert_eq!(object_key("/a/b", &id), format!("a/b/{id}"));
    assert_eq!(object_key("", &id), id.to_string());
}

#[test]
fn chunks_split_large_downloads() {
    let sizes: Vec<_> = chunks(Bytes::from(vec![0u8; DOWNLOAD_CHUNK_BYTES * 2 + 1])).map(|c| c.len()).collect();
    assert_eq!(sizes, vec![DOWNLOAD_CHUNK_BYTES, DOWNLOAD_CHUNK_BYTES, 1]);
    assert_eq!(chunks(Bytes::new()).count(), 0);
}
