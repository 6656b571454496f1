//! Regex route table.
//!
//! Routes are regular expressions evaluated in registration order against the
//! escaped request path. Precedence:
//!
//! 1. The first matching pattern that has capture groups wins immediately.
//! 2. Otherwise the first matching pattern without capture groups is used as
//!    a fallback.
//! 3. Otherwise there is no match and the listener answers 404.
//!
//! Parameterised routes therefore beat catch-alls regardless of the order they
//! were registered in, while two parameterised routes are decided by order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use regex::{Captures, Regex};

use crate::action::Action;
use crate::error::RouteError;
use crate::handler::{BoxedEndpoint, Endpoint};
use crate::request::Request;
use crate::response::Response;

/// Path parameters extracted from a matched route.
///
/// Named groups are keyed by name; unnamed groups by `"$"` followed by their
/// zero-based group index.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params(HashMap<String, String>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn from_captures(regex: &Regex, captures: &Captures<'_>) -> Self {
        let params = regex
            .capture_names()
            .skip(1)
            .enumerate()
            .map(|(index, name)| {
                let key = match name {
                    Some(name) if !name.is_empty() => name.to_owned(),
                    _ => format!("${index}"),
                };
                let value = captures
                    .get(index + 1)
                    .map_or_else(String::new, |m| m.as_str().to_owned());
                (key, value)
            })
            .collect();
        Self(params)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A resolved route: the endpoint, the action to run and the path parameters.
pub struct Dispatch {
    endpoint: BoxedEndpoint,
    action: Action,
    params: Params,
}

impl Dispatch {
    pub fn action(&self) -> Action {
        self.action
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Runs the resolved action.
    pub async fn call(self, req: Request) -> Response {
        match self.action {
            Action::Read => self.endpoint.read(req, self.params).await,
            Action::Create => self.endpoint.create(req, self.params).await,
            Action::Delete => self.endpoint.delete(req, self.params).await,
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("action", &self.action)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

struct Route {
    regex: Regex,
    endpoint: BoxedEndpoint,
}

/// The application route table.
///
/// Build it once at startup and hand it to [`Server::serve`](crate::Server::serve).
/// Each registration returns `self` so calls chain:
///
/// ```rust
/// # use coverhub::{NotImplemented, RouteTable};
/// let routes = RouteTable::new()
///     .route(r"^/reports/(?P<project>[\w/]+)/(?P<tag>[A-Za-z0-9]+)\.(?P<format>html|svg)$", NotImplemented)
///     .route(r"^/healthz$", NotImplemented);
/// ```
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Registers `endpoint` under `pattern`.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid regular expression. Use
    /// [`try_route`](Self::try_route) to handle the error instead.
    pub fn route(self, pattern: &str, endpoint: impl Endpoint) -> Self {
        self.try_route(pattern, endpoint)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Registers `endpoint` under `pattern`, failing on an invalid pattern.
    pub fn try_route(self, pattern: &str, endpoint: impl Endpoint) -> Result<Self, RouteError> {
        self.try_route_shared(pattern, Arc::new(endpoint))
    }

    /// Like [`try_route`](Self::try_route) for an endpoint that is already
    /// shared, e.g. one instance mounted under several patterns.
    pub fn try_route_shared(mut self, pattern: &str, endpoint: BoxedEndpoint) -> Result<Self, RouteError> {
        let regex = Regex::new(pattern).map_err(|e| RouteError::new(pattern, e))?;
        self.routes.push(Route { regex, endpoint });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolves `method` + `path`. `None` means nothing matched.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<Dispatch> {
        let action = Action::for_method(method);
        let mut fallback: Option<&BoxedEndpoint> = None;

        for route in &self.routes {
            // captures_len counts the implicit whole-match group.
            if route.regex.captures_len() == 1 {
                if fallback.is_none() && route.regex.is_match(path) {
                    fallback = Some(&route.endpoint);
                }
                continue;
            }

            let Some(captures) = route.regex.captures(path) else {
                continue;
            };

            return Some(Dispatch {
                endpoint: Arc::clone(&route.endpoint),
                action,
                params: Params::from_captures(&route.regex, &captures),
            });
        }

        fallback.map(|endpoint| Dispatch {
            endpoint: Arc::clone(endpoint),
            action,
            params: Params::default(),
        })
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|r| r.regex.as_str()))
            .finish()
    }
}
