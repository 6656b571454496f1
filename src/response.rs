//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Bodies are either fully buffered (`json`, `text`, `bytes`) or streamed from
//! any [`AsyncRead`], which is how a [`FileReader`](crate::store::FileReader)
//! reaches the client without being buffered a second time.

use bytes::Bytes;
use futures::TryStreamExt;
use http::{HeaderName, HeaderValue, StatusCode, header};
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::error;

use crate::request::{Body, BoxError};

// ── ContentType ───────────────────────────────────────────────────────────────

/// Content-type values the service sends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use coverhub::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::text("not-found");
/// Response::status(StatusCode::NO_CONTENT);
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/files/reports/42")
///     .bytes(ContentType::Svg, b"<svg/>".to_vec());
/// ```
pub struct Response {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Body,
}

impl Response {
    /// `200 OK` with `application/json`.
    pub fn json(body: Vec<u8>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Converts into the `http` type hyper writes to the wire.
    pub fn into_inner(self) -> http::Response<Body> {
        let mut res = http::Response::new(self.body);
        *res.status_mut() = self.status;
        let headers = res.headers_mut();
        for (name, value) in self.headers {
            headers.append(name, value);
        }
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: Vec<(HeaderName, HeaderValue)>,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Adds a header. Names or values that are not valid HTTP are dropped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            _ => error!(header = name, "dropping invalid response header"),
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: Vec<u8>) -> Response {
        self.bytes(ContentType::Json, body)
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.bytes(ContentType::Text, body.into().into_bytes())
    }

    /// Terminate with a buffered body of the given type.
    pub fn bytes(self, content_type: ContentType, body: Vec<u8>) -> Response {
        let body = Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed_unsync();
        self.finish(content_type.as_str(), body)
    }

    /// Terminate with a body streamed from `reader`.
    ///
    /// A read error aborts the response mid-body; hyper resets the stream so
    /// the client never mistakes a truncated body for a complete one.
    pub fn stream<R>(self, content_type: &str, reader: R) -> Response
    where
        R: AsyncRead + Send + 'static,
    {
        let frames = ReaderStream::new(reader)
            .map_ok(Frame::data)
            .map_err(BoxError::from);
        self.finish(content_type, StreamBody::new(frames).boxed_unsync())
    }

    /// Terminate with no body.
    pub fn no_body(self) -> Response {
        let body = Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync();
        Response { status: self.status, headers: self.headers, body }
    }

    fn finish(self, content_type: &str, body: Body) -> Response {
        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.push((header::CONTENT_TYPE, value));
        }
        headers.extend(self.headers);
        Response { status: self.status, headers, body }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a status directly: `return StatusCode::NOT_FOUND.into_response()`.
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// A serde-serialisable value sent as `application/json` with a chosen status.
pub struct Json<T: Serialize>(pub StatusCode, pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.1) {
            Ok(bytes) => Response::builder().status(self.0).json(bytes),
            Err(e) => {
                error!(error = %e, "unable to serialise response body");
                Response::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}
