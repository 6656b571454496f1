//! Coverage report intake.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use uuid::Uuid;

use super::projects::{authorise, project_key};
use super::{created, rejected};
use crate::coverage::{self, CoverageReport, ReportError};
use crate::handler::Endpoint;
use crate::request::{BodyError, Request};
use crate::response::Response;
use crate::projects::ProjectStore;
use crate::router::Params;
use crate::store::{FileId, FileStore};

const REPORT_DIRECTORY: &str = "reports";
const REPORT_CONTENT_TYPE: &str = "text/plain";
const MAX_TAG_LENGTH: usize = 64;

/// Per-file line of a [`ReportSummary`].
#[derive(Debug, PartialEq, Serialize)]
pub struct FileSummary {
    pub name: String,
    pub statements: u64,
    pub covered: u64,
    pub coverage: f64,
}

/// What `POST /reports` answers with.
#[derive(Debug, PartialEq, Serialize)]
pub struct ReportSummary {
    pub id: FileId,
    pub key: String,
    pub project: Uuid,
    pub tag: String,
    pub mode: Option<String>,
    pub coverage: f64,
    pub files: Vec<FileSummary>,
}

impl ReportSummary {
    fn new(id: FileId, key: String, project: Uuid, tag: String, report: &CoverageReport) -> Self {
        let files = report
            .files
            .values()
            .map(|file| {
                let (covered, statements) = file.statements();
                FileSummary { name: file.file_name.clone(), statements, covered, coverage: file.coverage() }
            })
            .collect();
        Self { id, key, project, tag, mode: report.mode.clone(), coverage: report.coverage, files }
    }
}

/// `reports/<project>/<tag>`, the directory a project's reports for `tag`
/// are stored under.
fn report_directory(project: &Uuid, tag: &str) -> String {
    format!("{REPORT_DIRECTORY}/{project}/{tag}")
}

/// Tags become part of an object key, so only `[A-Za-z0-9_-]` is allowed.
fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= MAX_TAG_LENGTH
        && tag.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// `create` validates a coverage profile and stores it for the project whose
/// token is in `x-project-key`, under the `tag` query parameter.
///
/// The body is buffered up to `max_bytes` because parsing is all or nothing:
/// nothing is stored unless every line parses.
#[derive(Clone)]
pub struct ReportEndpoint {
    store: FileStore,
    projects: Arc<dyn ProjectStore>,
    max_bytes: usize,
}

impl ReportEndpoint {
    pub fn new(store: FileStore, projects: Arc<dyn ProjectStore>, max_bytes: usize) -> Self {
        Self { store, projects, max_bytes }
    }
}

impl fmt::Debug for ReportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportEndpoint")
            .field("store", &self.store)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Endpoint for ReportEndpoint {
    async fn create(&self, req: Request, _params: Params) -> Response {
        let key = project_key(&req);
        let project = match authorise(&*self.projects, key.as_deref()).await {
            Ok(project) => project,
            Err(response) => return response,
        };

        let tag = match req.query_param("tag") {
            Some(tag) if is_valid_tag(&tag) => tag,
            other => {
                warn!(project_id = %project.system_id, tag = ?other, "invalid report tag");
                return rejected(StatusCode::BAD_REQUEST, "invalid-tag");
            }
        };

        let body = match req.collect_limited(self.max_bytes).await {
            Ok(body) => body,
            Err(BodyError::TooLarge { limit }) => {
                warn!(limit, "report too large");
                return rejected(StatusCode::PAYLOAD_TOO_LARGE, "report-too-large");
            }
            Err(e) => {
                warn!(error = %e, "unable to read report");
                return rejected(StatusCode::BAD_REQUEST, "bad-request");
            }
        };

        let report = match coverage::parse(&body[..]) {
            Ok(report) => report,
            Err(ReportError::Invalid(e)) => {
                warn!(line_number = e.line_number, kind = ?e.kind, "invalid report");
                return rejected(StatusCode::UNPROCESSABLE_ENTITY, e.to_string());
            }
            Err(ReportError::Io(e)) => {
                // Only non-UTF-8 input fails to read from memory.
                warn!(error = %e, "unreadable report");
                return rejected(StatusCode::UNPROCESSABLE_ENTITY, "invalid-report");
            }
        };

        let directory = report_directory(&project.system_id, &tag);
        let (id, mut writer) = match self.store.create(REPORT_CONTENT_TYPE, &directory).await {
            Ok(created) => created,
            Err(e) => {
                error!(error = %e, "unable to create report file");
                return rejected(StatusCode::INTERNAL_SERVER_ERROR, "storage-unavailable");
            }
        };

        let stored = async {
            writer.write_all(&body).await?;
            writer.shutdown().await
        };
        if let Err(e) = stored.await {
            warn!(file_id = %id, error = %e, "report upload failed");
            return rejected(StatusCode::BAD_GATEWAY, "upload-failed");
        }

        info!(
            file_id = %id,
            project_id = %project.system_id,
            tag = %tag,
            files = report.files.len(),
            coverage = report.coverage,
            "report stored"
        );
        created(ReportSummary::new(id, writer.key().to_owned(), project.system_id, tag, &report))
    }
}
