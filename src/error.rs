//! Listener and route-table errors.
//!
//! Errors that belong to a single subsystem live next to it:
//! [`ReportError`](crate::coverage::ReportError) for the coverage parser and
//! [`TransferError`](crate::store::TransferError) for the storage bridge.

use std::fmt;

/// The error type returned by the listener.
///
/// Application-level failures (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: binding to a port or accepting a connection.
#[derive(Debug)]
pub struct Error(std::io::Error);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "io: {}", self.0)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self(e)
    }
}

/// A route pattern that failed to compile.
///
/// Raised while the route table is being built. The service must not start
/// serving traffic with a partial table, so callers treat this as fatal.
#[derive(Debug, thiserror::Error)]
#[error("invalid route `{pattern}`: {source}")]
pub struct RouteError {
    pattern: String,
    #[source]
    source: regex::Error,
}

impl RouteError {
    pub(crate) fn new(pattern: &str, source: regex::Error) -> Self {
        Self { pattern: pattern.to_owned(), source }
    }

    /// The pattern text that was rejected.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}
