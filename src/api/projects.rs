//! Project listing, creation and deletion.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{Envelope, PROJECT_KEY_HEADER, Paging, created, ok, rejected};
use crate::handler::Endpoint;
use crate::projects::{Page, Project, ProjectError, ProjectStore, generate_token};
use crate::request::{BodyError, Request};
use crate::response::{IntoResponse, Json, Response};
use crate::router::Params;

/// Largest `POST /projects` body.
const MAX_PROJECT_BODY_BYTES: usize = 4 * 1024;

#[derive(Debug, Deserialize)]
struct NewProject {
    name: String,
}

/// The only answer that ever shows a token.
#[derive(Debug, Serialize)]
struct CreatedProject<'a> {
    #[serde(flatten)]
    project: &'a Project,
    token: &'a str,
}

/// `read` pages through projects, `create` makes one and hands out its
/// token, `delete` removes the project named by the `id` parameter when the
/// request carries that project's token.
#[derive(Clone)]
pub struct ProjectEndpoint {
    projects: Arc<dyn ProjectStore>,
}

impl ProjectEndpoint {
    pub fn new(projects: Arc<dyn ProjectStore>) -> Self {
        Self { projects }
    }
}

impl fmt::Debug for ProjectEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectEndpoint").finish_non_exhaustive()
    }
}

/// The `x-project-key` header of `req`, if any.
pub(crate) fn project_key(req: &Request) -> Option<String> {
    req.header(PROJECT_KEY_HEADER).filter(|token| !token.is_empty()).map(str::to_owned)
}

/// The project whose token is `key`.
pub(crate) async fn authorise(projects: &dyn ProjectStore, key: Option<&str>) -> Result<Project, Response> {
    let Some(token) = key else {
        warn!("request without a project key");
        return Err(rejected(StatusCode::UNAUTHORIZED, "invalid-project"));
    };

    match projects.find_by_token(token).await {
        Ok(Some(project)) => Ok(project),
        Ok(None) => {
            warn!("unknown project key");
            Err(rejected(StatusCode::UNAUTHORIZED, "invalid-project"))
        }
        Err(e) => {
            error!(error = %e, "unable to look up project");
            Err(rejected(StatusCode::INTERNAL_SERVER_ERROR, "server-error"))
        }
    }
}

/// Unparsable values fall back to the default.
fn paging_param(req: &Request, name: &str) -> Option<u64> {
    req.query_param(name)?.parse().ok()
}

#[async_trait]
impl Endpoint for ProjectEndpoint {
    async fn read(&self, req: Request, _params: Params) -> Response {
        let defaults = Page::default();
        let page = Page::new(
            paging_param(&req, "offset").unwrap_or(defaults.offset),
            paging_param(&req, "limit").unwrap_or(defaults.limit),
        );

        let listed = async {
            let projects = self.projects.find_projects(page).await?;
            let total = self.projects.count_projects().await?;
            Ok::<_, ProjectError>((projects, total))
        };
        match listed.await {
            Ok((projects, total)) => {
                let paging = Paging { total, offset: page.offset, limit: page.limit };
                Json(StatusCode::OK, Envelope::page(projects, paging)).into_response()
            }
            Err(e) => {
                warn!(error = %e, "unable to find projects");
                rejected(StatusCode::INTERNAL_SERVER_ERROR, "server-error")
            }
        }
    }

    async fn create(&self, req: Request, _params: Params) -> Response {
        let body = match req.collect_limited(MAX_PROJECT_BODY_BYTES).await {
            Ok(body) => body,
            Err(BodyError::TooLarge { limit }) => {
                warn!(limit, "project body too large");
                return rejected(StatusCode::PAYLOAD_TOO_LARGE, "invalid-project");
            }
            Err(e) => {
                warn!(error = %e, "unable to read project");
                return rejected(StatusCode::BAD_REQUEST, "bad-request");
            }
        };

        let name = match serde_json::from_slice::<NewProject>(&body) {
            Ok(project) => project.name.trim().to_owned(),
            Err(e) => {
                warn!(error = %e, "invalid project body");
                return rejected(StatusCode::UNPROCESSABLE_ENTITY, "invalid-project");
            }
        };
        if name.is_empty() {
            return rejected(StatusCode::UNPROCESSABLE_ENTITY, "invalid-project");
        }

        let token = generate_token();
        match self.projects.create_project(&name, &token).await {
            Ok(project) => {
                info!(project_id = %project.system_id, name = %project.name, "created project");
                created(CreatedProject { project: &project, token: &token })
            }
            Err(ProjectError::Duplicate(name)) => {
                warn!(name = %name, "duplicate project");
                rejected(StatusCode::CONFLICT, "duplicate-project")
            }
            Err(e) => {
                error!(error = %e, "unable to create project");
                rejected(StatusCode::INTERNAL_SERVER_ERROR, "server-error")
            }
        }
    }

    async fn delete(&self, req: Request, params: Params) -> Response {
        let id = params.get("id").unwrap_or_default();
        let key = project_key(&req);
        let project = match authorise(&*self.projects, key.as_deref()).await {
            Ok(project) => project,
            Err(response) => return response,
        };

        if !project.is_identified_by(id) {
            warn!(id, project_id = %project.system_id, "project key belongs to another project");
            return rejected(StatusCode::FORBIDDEN, "invalid-project");
        }

        match self.projects.delete_project(&project.system_id).await {
            Ok(()) => {
                info!(project_id = %project.system_id, name = %project.name, "deleted project");
                ok(Vec::<()>::new())
            }
            Err(ProjectError::NotFound(_)) => rejected(StatusCode::NOT_FOUND, "not-found"),
            Err(e) => {
                error!(project_id = %project.system_id, error = %e, "unable to delete project");
                rejected(StatusCode::INTERNAL_SERVER_ERROR, "server-error")
            }
        }
    }
}
