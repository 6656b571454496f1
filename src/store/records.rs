//! File record persistence.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::postgres::PgPool;
use tracing::instrument;

use super::FileId;

/// Lifecycle of a stored file. Only ever moves forward.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
    /// Bytes may still be in flight.
    Pending,
    /// The backend confirmed the upload.
    Valid,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Valid => "VALID",
        }
    }

    /// Whether a record in `self` may move to `next`.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!((self, next), (Self::Pending, Self::Valid))
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "VALID" => Ok(Self::Valid),
            other => Err(RecordError::UnknownStatus(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no pending file record {0}")]
    NotFound(FileId),
    #[error("file record {id} cannot move from {from} to {to}")]
    InvalidTransition { id: FileId, from: FileStatus, to: FileStatus },
    #[error("files are created PENDING, not {0}")]
    InvalidInitialStatus(FileStatus),
    #[error("unknown file status `{0}`")]
    UnknownStatus(String),
}

/// Persists file records.
///
/// Shared by every concurrent transfer, so implementations must tolerate
/// independent concurrent calls.
#[async_trait]
pub trait FileRecords: Send + Sync + 'static {
    async fn create_file(&self, id: &FileId, status: FileStatus) -> Result<(), RecordError>;

    async fn update_status(&self, id: &FileId, status: FileStatus) -> Result<(), RecordError>;
}

// ── In-process records ────────────────────────────────────────────────────────

/// File records kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryFileRecords {
    files: Mutex<HashMap<FileId, FileStatus>>,
}

impl MemoryFileRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, id: &FileId) -> Option<FileStatus> {
        self.files.lock().get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

#[async_trait]
impl FileRecords for MemoryFileRecords {
    async fn create_file(&self, id: &FileId, status: FileStatus) -> Result<(), RecordError> {
        if status != FileStatus::Pending {
            return Err(RecordError::InvalidInitialStatus(status));
        }
        self.files.lock().insert(*id, status);
        Ok(())
    }

    async fn update_status(&self, id: &FileId, status: FileStatus) -> Result<(), RecordError> {
        let mut files = self.files.lock();
        let current = files.get_mut(id).ok_or(RecordError::NotFound(*id))?;
        if !current.can_advance_to(status) {
            return Err(RecordError::InvalidTransition { id: *id, from: *current, to: status });
        }
        *current = status;
        Ok(())
    }
}

// ── Postgres records ──────────────────────────────────────────────────────────

/// File records in the `files` table.
pub struct PgFileRecords {
    pool: PgPool,
}

impl PgFileRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRecords for PgFileRecords {
    #[instrument(skip(self), fields(file_id = %id))]
    async fn create_file(&self, id: &FileId, status: FileStatus) -> Result<(), RecordError> {
        if status != FileStatus::Pending {
            return Err(RecordError::InvalidInitialStatus(status));
        }
        sqlx::query("INSERT INTO files (system_id, status) VALUES ($1, $2)")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(file_id = %id))]
    async fn update_status(&self, id: &FileId, status: FileStatus) -> Result<(), RecordError> {
        // Only PENDING records advance, so a replayed update cannot regress one.
        let result = sqlx::query("UPDATE files SET status = $1 WHERE system_id = $2 AND status = $3")
            .bind(status.as_str())
            .bind(id.as_uuid())
            .bind(FileStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RecordError::NotFound(*id));
        }
        Ok(())
    }
}
