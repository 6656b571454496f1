//! The service's endpoints.
//!
//! JSON answers share one envelope:
//!
//! ```json
//! { "meta": { "time": "2026-01-01T00:00:00Z" }, "errors": [], "data": [ … ] }
//! ```
//!
//! A success carries its items in `data` and no errors; a failure carries
//! error codes in `errors` and no data. Paged listings add `total`, `offset`
//! and `limit` to `meta`.

mod files;
mod projects;
mod reports;

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::Serialize;

use crate::response::{IntoResponse, Json, Response};

pub use files::{FileDownload, FileUpload};
pub use projects::ProjectEndpoint;
pub use reports::{ReportEndpoint, ReportSummary};

/// Header carrying a project's token.
pub const PROJECT_KEY_HEADER: &str = "x-project-key";

#[derive(Debug, Serialize)]
struct Meta {
    time: DateTime<Utc>,
    #[serde(flatten)]
    paging: Option<Paging>,
}

impl Meta {
    fn now() -> Self {
        Self { time: Utc::now(), paging: None }
    }
}

/// Where a page sits in a listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Paging {
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// The JSON body every API answer is wrapped in.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    meta: Meta,
    errors: Vec<String>,
    data: Vec<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: Vec<T>) -> Self {
        Self { meta: Meta::now(), errors: Vec::new(), data }
    }

    pub fn page(data: Vec<T>, paging: Paging) -> Self {
        Self { meta: Meta { paging: Some(paging), ..Meta::now() }, errors: Vec::new(), data }
    }
}

impl Envelope<()> {
    pub fn failure<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { meta: Meta::now(), errors: errors.into_iter().map(Into::into).collect(), data: Vec::new() }
    }
}

/// `201` with `item` as the only datum.
pub(crate) fn created<T: Serialize>(item: T) -> Response {
    Json(StatusCode::CREATED, Envelope::success(vec![item])).into_response()
}

/// `200` with `data`.
pub(crate) fn ok<T: Serialize>(data: Vec<T>) -> Response {
    Json(StatusCode::OK, Envelope::success(data)).into_response()
}

/// `status` with a single error code.
pub(crate) fn rejected(status: StatusCode, error: impl Into<String>) -> Response {
    Json(status, Envelope::failure([error])).into_response()
}
