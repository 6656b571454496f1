//! # coverhub
//!
//! An artifact store for coverage reports, generated HTML and badge images.
//!
//! Three pieces do the work:
//!
//! - A regex [`RouteTable`] that resolves a request path to an [`Endpoint`]
//!   and picks one of its three [`Action`]s from the request method.
//! - A streaming [`FileStore`](store::FileStore) that pipes request bodies
//!   into object storage and object storage back into response bodies, while
//!   tracking every file as `PENDING` until the backend confirmed it.
//! - A [`coverage`] profile parser that validates `go test -coverprofile`
//!   output before it is stored.
//!
//! Reports belong to [`projects`]; a project's token, sent in
//! `x-project-key`, authorises storing reports for it and deleting it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use coverhub::api::{FileDownload, FileUpload};
//! use coverhub::store::{FileStore, MemoryFileRecords, MemoryObjectStorage, StoreOptions};
//! use coverhub::{RouteTable, Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = FileStore::new(
//!         Arc::new(MemoryFileRecords::new()),
//!         Arc::new(MemoryObjectStorage::new()),
//!         StoreOptions::default(),
//!     );
//!
//!     let routes = RouteTable::new()
//!         .try_route(r"^/files/(?P<directory>[\w\-/]+)/(?P<id>[0-9a-f\-]{36})$", FileDownload::new(store.clone()))?
//!         .try_route(r"^/files/(?P<directory>[\w\-/]+)$", FileUpload::new(store))?;
//!
//!     Server::bind(([0, 0, 0, 0], 8080).into()).serve(routes).await?;
//!     Ok(())
//! }
//! ```

mod action;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod api;
pub mod config;
pub mod coverage;
pub mod db;
pub mod health;
pub mod projects;
pub mod store;

pub use action::Action;
pub use crate::config::Config;
pub use error::{Error, RouteError};
pub use handler::{BoxedEndpoint, Endpoint, NotImplemented};
pub use request::{Body, BodyError, BoxError, Request};
pub use response::{ContentType, IntoResponse, Json, Response, ResponseBuilder};
pub use router::{Dispatch, Params, RouteTable};
pub use server::{Server, dispatch};
