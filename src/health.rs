//! Built-in health-check endpoints.
//!
//! | Check | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! ```rust
//! use coverhub::{RouteTable, health::HealthEndpoint};
//!
//! let routes = RouteTable::new()
//!     .route(r"^/healthz$", HealthEndpoint::Liveness)
//!     .route(r"^/readyz$", HealthEndpoint::Readiness);
//! ```

use async_trait::async_trait;

use crate::handler::Endpoint;
use crate::request::Request;
use crate::response::Response;
use crate::router::Params;

/// Answers a health check on `read`; every other action is not implemented.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HealthEndpoint {
    /// `200 ok` whenever the process can answer HTTP at all.
    Liveness,
    /// `200 ready`. Backends are connected before the listener binds, so a
    /// listening process is ready.
    Readiness,
}

#[async_trait]
impl Endpoint for HealthEndpoint {
    async fn read(&self, _req: Request, _params: Params) -> Response {
        match self {
            Self::Liveness => Response::text("ok"),
            Self::Readiness => Response::text("ready"),
        }
    }
}
