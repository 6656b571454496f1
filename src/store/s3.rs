//! S3-backed object storage.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use futures::stream::Fuse;
use futures::{Stream, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::object::{ObjectBody, ObjectStorage, StorageError};
use crate::config::S3Config;

/// Smallest part S3 accepts for any part but the last.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 object storage.
///
/// Uploads are streamed in `part_size_bytes` parts. A body that ends before
/// the first part fills is sent with a single `PutObject`; anything larger
/// goes through a multipart upload, which is aborted if the body or any part
/// fails so no partial object becomes visible.
pub struct S3ObjectStorage {
    client: S3Client,
    bucket: String,
    part_size: usize,
    download_limit: Option<usize>,
}

impl S3ObjectStorage {
    /// Create a new S3 client from configuration
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object storage initialized"
        );

        Self::from_client(client, &config.bucket, config.part_size_bytes)
    }

    /// Part sizes below [`MIN_PART_SIZE`] are raised to it.
    pub fn from_client(client: S3Client, bucket: &str, part_size: usize) -> Self {
        Self { client, bucket: bucket.to_owned(), part_size: clamp_part_size(part_size), download_limit: None }
    }

    /// Refuse downloads whose `Content-Length` exceeds `limit`.
    pub fn with_download_limit(mut self, limit: usize) -> Self {
        self.download_limit = Some(limit);
        self
    }

    async fn put_object(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<(), StorageError> {
        debug!(size_bytes = bytes.len(), "single part upload");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn multipart_upload(
        &self,
        key: &str,
        content_type: &str,
        first: Bytes,
        parts: &mut Parts,
    ) -> Result<(), StorageError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(backend)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Backend("no upload id in response".to_owned()))?
            .to_owned();

        match self.upload_parts(key, &upload_id, first, parts).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder().set_parts(Some(parts)).build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(backend)?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(upload_id = %upload_id, error = %DisplayErrorContext(&abort), "unable to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        parts: &mut Parts,
    ) -> Result<Vec<CompletedPart>, StorageError> {
        let mut completed = Vec::new();
        let mut part = Some(first);
        while let Some(bytes) = part {
            let part_number = i32::try_from(completed.len() + 1)
                .map_err(|_| StorageError::Backend("too many parts".to_owned()))?;
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(bytes))
                .send()
                .await
                .map_err(backend)?;

            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(uploaded.e_tag().unwrap_or_default())
                    .build(),
            );
            part = parts.next().await?;
        }
        Ok(completed)
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    #[instrument(skip(self, body), fields(bucket = %self.bucket))]
    async fn upload(&self, key: &str, content_type: &str, body: ObjectBody) -> Result<(), StorageError> {
        let mut parts = Parts::new(body, self.part_size);
        let first = parts.next().await?.unwrap_or_default();
        if parts.is_finished() {
            return self.put_object(key, content_type, first).await;
        }
        self.multipart_upload(key, content_type, first, &mut parts).await
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        let output = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Err(StorageError::NotFound(key.to_owned()));
            }
            Err(e) => return Err(backend(e)),
        };

        if let (Some(limit), Some(length)) = (self.download_limit, output.content_length()) {
            if usize::try_from(length).map_or(true, |length| length > limit) {
                return Err(StorageError::TooLarge { limit });
            }
        }

        let bytes = output.body.collect().await.map_err(backend)?.into_bytes();
        debug!(size_bytes = bytes.len(), "object downloaded");
        Ok(bytes)
    }
}

/// An upload body cut into parts of `part_size` bytes, except the last.
///
/// The body is never polled again once it ended.
struct Parts {
    body: Fuse<ObjectBody>,
    part_size: usize,
    yielded: usize,
    finished: bool,
}

impl Parts {
    fn new(body: ObjectBody, part_size: usize) -> Self {
        Self { body: body.fuse(), part_size, yielded: 0, finished: false }
    }

    /// The next part, or `None` after the last one. An empty body yields one
    /// empty part.
    async fn next(&mut self) -> Result<Option<Bytes>, StorageError> {
        if self.finished {
            return Ok(None);
        }
        let (part, finished) = read_part(&mut self.body, self.part_size).await?;
        self.finished = finished;
        if part.is_empty() && self.yielded > 0 {
            return Ok(None);
        }
        self.yielded += 1;
        Ok(Some(part))
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

fn clamp_part_size(requested: usize) -> usize {
    if requested < MIN_PART_SIZE {
        warn!(requested, minimum = MIN_PART_SIZE, "part size below the S3 minimum, using the minimum");
    }
    requested.max(MIN_PART_SIZE)
}

/// Reads up to one part from `body`. The flag is set once the body ended.
async fn read_part<S>(body: &mut S, part_size: usize) -> Result<(Bytes, bool), StorageError>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut buffer = BytesMut::new();
    while buffer.len() < part_size {
        match body.next().await {
            Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
            Some(Err(e)) => return Err(StorageError::Body(e)),
            None => return Ok((buffer.freeze(), true)),
        }
    }
    Ok((buffer.freeze(), false))
}

fn backend<E: std::error::Error + 'static>(e: E) -> StorageError {
    StorageError::Backend(DisplayErrorContext(e).to_string())
}
