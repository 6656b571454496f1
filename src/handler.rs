//! The endpoint capability set.
//!
//! An [`Endpoint`] answers the three [`Action`](crate::Action)s. Each entry
//! point has a provided implementation that delegates to [`NotImplemented`],
//! so an endpoint only writes the verbs it supports:
//!
//! ```rust
//! use async_trait::async_trait;
//! use coverhub::{Endpoint, Params, Request, Response};
//!
//! struct Badge;
//!
//! #[async_trait]
//! impl Endpoint for Badge {
//!     async fn read(&self, _req: Request, params: Params) -> Response {
//!         Response::text(format!("project[{}]", params.get("project").unwrap_or_default()))
//!     }
//! }
//! ```
//!
//! Endpoints are stored as `Arc<dyn Endpoint>` and shared across every
//! concurrent request, so they must be `Send + Sync`.

use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use tracing::warn;

use crate::request::Request;
use crate::response::Response;
use crate::router::Params;

/// A type-erased endpoint shared across concurrent requests.
pub type BoxedEndpoint = Arc<dyn Endpoint>;

/// Handles requests for one route.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// `GET` and every method that is neither `POST` nor `DELETE`.
    async fn read(&self, req: Request, params: Params) -> Response {
        NotImplemented.read(req, params).await
    }

    /// `POST`.
    async fn create(&self, req: Request, params: Params) -> Response {
        NotImplemented.create(req, params).await
    }

    /// `DELETE`.
    async fn delete(&self, req: Request, params: Params) -> Response {
        NotImplemented.delete(req, params).await
    }
}

/// The default answer for an unsupported verb: `400 not-implemented`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NotImplemented;

impl NotImplemented {
    pub fn respond(&self, req: &Request) -> Response {
        warn!(method = %req.method(), path = req.path(), "not implemented");
        Response::builder().status(StatusCode::BAD_REQUEST).text("not-implemented")
    }
}

#[async_trait]
impl Endpoint for NotImplemented {
    async fn read(&self, req: Request, _params: Params) -> Response {
        self.respond(&req)
    }

    async fn create(&self, req: Request, _params: Params) -> Response {
        self.respond(&req)
    }

    async fn delete(&self, req: Request, _params: Params) -> Response {
        self.respond(&req)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;
    use http_body_util::{BodyExt, Full};

    use super::*;

    struct ReadOnly;

    #[async_trait]
    impl Endpoint for ReadOnly {
        async fn read(&self, _req: Request, _params: Params) -> Response {
            Response::text("read")
        }
    }

    fn request(method: Method) -> Request {
        Request::from_http(
            http::Request::builder()
                .method(method)
                .uri("/reports")
                .body(Full::new(Bytes::new()))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn implemented_verb_runs() {
        let res = ReadOnly.read(request(Method::GET), Params::default()).await;
        assert_eq!(res.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_verbs_fall_back_to_not_implemented() {
        for res in [
            ReadOnly.create(request(Method::POST), Params::default()).await,
            ReadOnly.delete(request(Method::DELETE), Params::default()).await,
        ] {
            assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
            let body = res.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"not-implemented");
        }
    }
}
