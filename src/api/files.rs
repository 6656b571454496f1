//! Raw file upload and download.

use async_trait::async_trait;
use http::StatusCode;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use super::{created, rejected};
use crate::handler::Endpoint;
use crate::request::Request;
use crate::response::{ContentType, Response};
use crate::router::Params;
use crate::store::{FileId, FileStore, TransferError};

#[derive(Debug, Serialize)]
struct StoredFile {
    id: FileId,
    key: String,
    size: u64,
}

/// `create` streams the request body into a new file under the `directory`
/// parameter.
#[derive(Clone, Debug)]
pub struct FileUpload {
    store: FileStore,
}

impl FileUpload {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Endpoint for FileUpload {
    async fn create(&self, req: Request, params: Params) -> Response {
        let directory = params.get("directory").unwrap_or_default();
        let content_type = req.content_type().unwrap_or(ContentType::OctetStream.as_str()).to_owned();

        let (id, mut writer) = match self.store.create(&content_type, directory).await {
            Ok(created) => created,
            Err(e) => {
                error!(directory, error = %e, "unable to create file");
                return rejected(StatusCode::INTERNAL_SERVER_ERROR, "storage-unavailable");
            }
        };

        let mut body = req.into_reader();
        let size = match tokio::io::copy(&mut body, &mut writer).await {
            Ok(size) => size,
            Err(e) => {
                // Dropping the writer aborts the upload.
                warn!(file_id = %id, error = %e, "file upload interrupted");
                return rejected(StatusCode::BAD_GATEWAY, "upload-failed");
            }
        };

        if let Err(e) = writer.shutdown().await {
            warn!(file_id = %id, error = %e, "file upload failed");
            return rejected(StatusCode::BAD_GATEWAY, "upload-failed");
        }

        info!(file_id = %id, key = writer.key(), size, "file uploaded");
        created(StoredFile { id, key: writer.key().to_owned(), size })
    }
}

/// `read` streams back the file stored under the `directory` and `id`
/// parameters.
#[derive(Clone, Debug)]
pub struct FileDownload {
    store: FileStore,
}

impl FileDownload {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Endpoint for FileDownload {
    async fn read(&self, _req: Request, params: Params) -> Response {
        let key = format!(
            "{}/{}",
            params.get("directory").unwrap_or_default(),
            params.get("id").unwrap_or_default()
        );

        let reader = match self.store.open(&key) {
            Ok(reader) => reader,
            Err(e) => {
                warn!(key = %key, error = %e, "unable to open file");
                return rejected(StatusCode::BAD_REQUEST, "invalid-key");
            }
        };

        // Wait for the first bytes so a failed download is answered with a
        // status instead of a truncated 200.
        let mut reader = BufReader::new(reader);
        if let Err(e) = reader.fill_buf().await {
            return match TransferError::from_io(&e) {
                Some(t) if t.is_not_found() => {
                    warn!(key = %key, "no such file");
                    Response::builder().status(StatusCode::NOT_FOUND).text("not-found")
                }
                Some(TransferError::TooLarge { .. }) => rejected(StatusCode::PAYLOAD_TOO_LARGE, "file-too-large"),
                _ => {
                    error!(key = %key, error = %e, "file download failed");
                    rejected(StatusCode::BAD_GATEWAY, "download-failed")
                }
            };
        }

        Response::builder().stream(ContentType::OctetStream.as_str(), reader)
    }
}
