//! Projects group reports and authorise changes to them with a token.
//!
//! A token is handed out once, when the project is created. Listing a
//! project never shows it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use sqlx::FromRow;
use sqlx::postgres::PgPool;
use tracing::instrument;
use uuid::Uuid;

/// Hex characters in a generated project token.
pub const TOKEN_LENGTH: usize = 20;

/// Largest page a listing returns.
pub const MAX_PAGE_LIMIT: u64 = 100;

/// A stored project
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Project {
    /// Sequential id
    pub id: i64,
    /// Public identity, also used in report keys
    pub system_id: Uuid,
    /// Unique display name
    pub name: String,
    /// Secret sent back in `x-project-key`
    #[serde(skip)]
    #[sqlx(rename = "auth_token")]
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Whether `id` names this project, either by system id or sequential id.
    pub fn is_identified_by(&self, id: &str) -> bool {
        self.system_id.to_string() == id || self.id.to_string() == id
    }
}

/// Window into the project listing, ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    /// A page with its limit capped at [`MAX_PAGE_LIMIT`].
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit: limit.min(MAX_PAGE_LIMIT) }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { offset: 0, limit: 10 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("a project named `{0}` already exists")]
    Duplicate(String),
    #[error("no project {0}")]
    NotFound(Uuid),
}

/// A fresh random token of [`TOKEN_LENGTH`] hex characters.
pub fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_LENGTH / 2];
    rand::rng().fill(&mut buf);
    hex::encode(buf)
}

/// Persists projects.
#[async_trait]
pub trait ProjectStore: Send + Sync + 'static {
    /// Fails with [`ProjectError::Duplicate`] if the name is taken.
    async fn create_project(&self, name: &str, token: &str) -> Result<Project, ProjectError>;

    async fn find_projects(&self, page: Page) -> Result<Vec<Project>, ProjectError>;

    async fn count_projects(&self) -> Result<u64, ProjectError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Project>, ProjectError>;

    async fn delete_project(&self, system_id: &Uuid) -> Result<(), ProjectError>;
}

// ── In-process projects ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    projects: Vec<Project>,
}

/// Projects kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryProjects {
    state: Mutex<MemoryState>,
}

impl MemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().projects.is_empty()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjects {
    async fn create_project(&self, name: &str, token: &str) -> Result<Project, ProjectError> {
        let mut state = self.state.lock();
        if state.projects.iter().any(|p| p.name == name) {
            return Err(ProjectError::Duplicate(name.to_owned()));
        }
        state.last_id += 1;
        let project = Project {
            id: state.last_id,
            system_id: Uuid::new_v4(),
            name: name.to_owned(),
            token: token.to_owned(),
            created_at: Utc::now(),
        };
        state.projects.push(project.clone());
        Ok(project)
    }

    async fn find_projects(&self, page: Page) -> Result<Vec<Project>, ProjectError> {
        let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit).unwrap_or(usize::MAX);
        Ok(self.state.lock().projects.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn count_projects(&self) -> Result<u64, ProjectError> {
        Ok(self.state.lock().projects.len() as u64)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Project>, ProjectError> {
        Ok(self.state.lock().projects.iter().find(|p| p.token == token).cloned())
    }

    async fn delete_project(&self, system_id: &Uuid) -> Result<(), ProjectError> {
        let mut state = self.state.lock();
        let before = state.projects.len();
        state.projects.retain(|p| p.system_id != *system_id);
        if state.projects.len() == before {
            return Err(ProjectError::NotFound(*system_id));
        }
        Ok(())
    }
}

// ── Postgres projects ─────────────────────────────────────────────────────────

const PROJECT_COLUMNS: &str = "id, system_id, name, auth_token, created_at";

/// Projects in the `projects` table.
pub struct PgProjects {
    pool: PgPool,
}

impl PgProjects {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectStore for PgProjects {
    #[instrument(skip(self, token))]
    async fn create_project(&self, name: &str, token: &str) -> Result<Project, ProjectError> {
        let sql = format!(
            "INSERT INTO projects (system_id, name, auth_token) VALUES ($1, $2, $3) RETURNING {PROJECT_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Project>(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(token)
            .fetch_one(&self.pool)
            .await;

        match created {
            Ok(project) => Ok(project),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(ProjectError::Duplicate(name.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn find_projects(&self, page: Page) -> Result<Vec<Project>, ProjectError> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY id LIMIT $1 OFFSET $2");
        let projects = sqlx::query_as::<_, Project>(&sql)
            .bind(i64::try_from(page.limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(page.offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(projects)
    }

    async fn count_projects(&self) -> Result<u64, ProjectError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[instrument(skip_all)]
    async fn find_by_token(&self, token: &str) -> Result<Option<Project>, ProjectError> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE auth_token = $1");
        let project = sqlx::query_as::<_, Project>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(project)
    }

    #[instrument(skip(self), fields(project_id = %system_id))]
    async fn delete_project(&self, system_id: &Uuid) -> Result<(), ProjectError> {
        let result = sqlx::query("DELETE FROM projects WHERE system_id = $1")
            .bind(system_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ProjectError::NotFound(*system_id));
        }
        Ok(())
    }
}
