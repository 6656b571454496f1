//! Incoming HTTP request type.

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::TryStreamExt;
use http::{HeaderMap, Method, header};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Collected, LengthLimitError, Limited};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// Boxed error produced by request and response bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased streaming body shared by requests and responses.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// Failure while buffering a request body.
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("unable to read request body: {0}")]
    Read(#[source] BoxError),
}

/// An incoming HTTP request.
///
/// The body is left unread so endpoints can stream it (into a
/// [`FileWriter`](crate::store::FileWriter), for instance) instead of
/// buffering it whole.
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    /// Wraps any `http::Request` whose body yields [`Bytes`].
    pub fn from_http<B>(req: http::Request<B>) -> Self
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().map(str::to_owned),
            headers: parts.headers,
            body: body.map_err(Into::into).boxed_unsync(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    /// The percent-encoded path, exactly as received.
    pub fn path(&self) -> &str { &self.path }
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }

    /// First value of a percent-decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Header lookup. Values that are not visible ASCII are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    /// Streams the body as an [`AsyncRead`], suitable for `tokio::io::copy`.
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.body.into_data_stream().map_err(io::Error::other))
    }

    /// Buffers the whole body, refusing anything larger than `limit` bytes.
    pub async fn collect_limited(self, limit: usize) -> Result<Bytes, BodyError> {
        // Boxed as `dyn Future + Send` so callers' `Send` checks do not have
        // to prove `Limited`'s error conversion for every lifetime.
        let collecting: Pin<Box<dyn Future<Output = Result<Collected<Bytes>, BoxError>> + Send>> =
            Box::pin(Limited::new(self.body, limit).collect());
        match collecting.await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => Err(BodyError::TooLarge { limit }),
            Err(e) => Err(BodyError::Read(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::Full;
    use tokio::io::AsyncReadExt;

    use super::*;

    fn request(body: &'static str) -> Request {
        Request::from_http(
            http::Request::builder()
                .method(Method::POST)
                .uri("/files/reports%2Fa?tag=v1")
                .header("content-type", "text/plain")
                .body(Full::new(Bytes::from_static(body.as_bytes())))
                .unwrap(),
        )
    }

    #[test]
    fn keeps_escaped_path_and_query() {
        let req = request("");
        assert_eq!(req.path(), "/files/reports%2Fa");
        assert_eq!(req.query(), Some("tag=v1"));
        assert_eq!(req.content_type(), Some("text/plain"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn query_params_are_decoded() {
        let req = Request::from_http(
            http::Request::builder()
                .uri("/projects?offset=20&name=acme%20lib&offset=30")
                .body(Full::new(Bytes::new()))
                .unwrap(),
        );
        assert_eq!(req.query_param("offset").as_deref(), Some("20"));
        assert_eq!(req.query_param("name").as_deref(), Some("acme lib"));
        assert_eq!(req.query_param("limit"), None);
        assert_eq!(request("").query_param("tag").as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn reader_streams_the_body() {
        let mut out = String::new();
        request("mode: set\n").into_reader().read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "mode: set\n");
    }

    #[tokio::test]
    async fn collect_limited_rejects_large_bodies() {
        let err = request("0123456789").collect_limited(4).await.unwrap_err();
        assert!(matches!(err, BodyError::TooLarge { limit: 4 }));

        let body = request("0123").collect_limited(4).await.unwrap();
        assert_eq!(&body[..], b"0123");
    }
}
