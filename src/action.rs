//! Endpoint actions.
//!
//! Every endpoint exposes the same three entry points. The request method only
//! decides which of them runs:
//!
//! | Method | Action |
//! |---|---|
//! | `POST` | [`Action::Create`] |
//! | `DELETE` | [`Action::Delete`] |
//! | anything else (`GET`, `HEAD`, `PUT`, …) | [`Action::Read`] |

use std::fmt;

use http::Method;

/// The endpoint entry point selected for a request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Action {
    Read,
    Create,
    Delete,
}

impl Action {
    /// Resolves the action for a request method.
    pub fn for_method(method: &Method) -> Self {
        match *method {
            Method::POST   => Self::Create,
            Method::DELETE => Self::Delete,
            _              => Self::Read,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read   => "read",
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

impl From<&Method> for Action {
    fn from(method: &Method) -> Self {
        Self::for_method(method)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
