use std::sync::Arc;

use bytes::Bytes;
use coverhub::api::{FileDownload, FileUpload, ProjectEndpoint, ReportEndpoint};
use coverhub::health::HealthEndpoint;
use coverhub::projects::MemoryProjects;
use coverhub::store::{FileId, FileStatus, FileStore, MemoryFileRecords, MemoryObjectStorage, StoreOptions};
use coverhub::{Body, RouteTable, dispatch};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::Value;

const REPORT: &str = "mode: set
github.com/acme/lib/author.go:11.81,12.52 3 1
github.com/acme/lib/author.go:14.2,16.10 1 0
github.com/acme/lib/book.go:3.1,4.2 4 2
";

struct App {
    routes: RouteTable,
    records: Arc<MemoryFileRecords>,
    objects: Arc<MemoryObjectStorage>,
    projects: Arc<MemoryProjects>,
}

fn app() -> App {
    let records = Arc::new(MemoryFileRecords::new());
    let objects = Arc::new(MemoryObjectStorage::new());
    let projects = Arc::new(MemoryProjects::new());
    let store = FileStore::new(records.clone(), objects.clone(), StoreOptions::default());

    let routes = RouteTable::new()
        .route(
            r"^/files/(?P<directory>[\w\-/]+)/(?P<id>[0-9a-f\-]{36})$",
            FileDownload::new(store.clone()),
        )
        .route(r"^/files/(?P<directory>[\w\-/]+)$", FileUpload::new(store.clone()))
        .route(r"^/reports$", ReportEndpoint::new(store, projects.clone(), 1024))
        .route(r"^/projects$", ProjectEndpoint::new(projects.clone()))
        .route(r"^/projects/(?P<id>[\w\-]+)$", ProjectEndpoint::new(projects.clone()))
        .route(r"^/healthz$", HealthEndpoint::Liveness)
        .route(r"^/readyz$", HealthEndpoint::Readiness);

    App { routes, records, objects, projects }
}

/// A created project's public id and token.
struct Created {
    system_id: String,
    token: String,
}

impl App {
    async fn send(&self, method: Method, uri: &str, body: impl Into<Bytes>) -> (StatusCode, Bytes) {
        self.send_keyed(method, uri, None, body).await
    }

    async fn send_keyed(
        &self,
        method: Method,
        uri: &str,
        key: Option<&str>,
        body: impl Into<Bytes>,
    ) -> (StatusCode, Bytes) {
        let mut req = http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "image/svg+xml");
        if let Some(key) = key {
            req = req.header("x-project-key", key);
        }
        let res: http::Response<Body> = dispatch(&self.routes, req.body(Full::new(body.into())).unwrap()).await;
        let status = res.status();
        (status, res.into_body().collect().await.unwrap().to_bytes())
    }

    async fn create_project(&self, name: &str) -> Created {
        let (status, body) = self
            .send(Method::POST, "/projects", serde_json::json!({ "name": name }).to_string())
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let project = &json(&body)["data"][0];
        Created {
            system_id: project["system_id"].as_str().unwrap().to_owned(),
            token: project["token"].as_str().unwrap().to_owned(),
        }
    }
}

fn json(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn uploaded_file_can_be_downloaded() {
    let app = app();

    let (status, body) = app.send(Method::POST, "/files/badges/acme", "<svg/>").await;
    assert_eq!(status, StatusCode::CREATED);
    let created = json(&body);
    assert_eq!(created["errors"], serde_json::json!([]));
    let key = created["data"][0]["key"].as_str().unwrap().to_owned();
    let id: uuid::Uuid = created["data"][0]["id"].as_str().unwrap().parse().unwrap();
    assert!(key.starts_with("badges/acme/"));
    assert_eq!(created["data"][0]["size"], 6);

    assert_eq!(app.records.status(&FileId::from(id)), Some(FileStatus::Valid));
    assert_eq!(app.objects.content_type(&key).as_deref(), Some("image/svg+xml"));

    let (status, body) = app.send(Method::GET, &format!("/files/{key}"), "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"<svg/>");
}

#[tokio::test]
async fn unknown_file_is_not_found() {
    let app = app();
    let (status, body) = app
        .send(Method::GET, "/files/badges/0b6f1c3e-2a9d-4a57-9a55-0d9f3d1f2c11", "")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"not-found");
}

#[tokio::test]
async fn unsupported_actions_are_not_implemented() {
    let app = app();

    // The upload route has no read action, the download route no create.
    for (method, uri) in [
        (Method::GET, "/files/badges"),
        (Method::POST, "/files/badges/0b6f1c3e-2a9d-4a57-9a55-0d9f3d1f2c11"),
        (Method::DELETE, "/reports"),
        (Method::POST, "/healthz"),
    ] {
        let (status, body) = app.send(method, uri, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(&body[..], b"not-implemented");
    }
    assert!(app.records.is_empty());
}

#[tokio::test]
async fn valid_report_is_stored_with_a_summary() {
    let app = app();
    let project = app.create_project("acme").await;

    let (status, body) = app
        .send_keyed(Method::POST, "/reports?tag=main", Some(&project.token), REPORT)
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let summary = &json(&body)["data"][0];
    assert_eq!(summary["mode"], "set");
    assert_eq!(summary["coverage"], 87.5);
    assert_eq!(summary["project"], project.system_id.as_str());
    assert_eq!(summary["tag"], "main");
    assert_eq!(summary["files"][0]["name"], "github.com/acme/lib/author.go");
    assert_eq!(summary["files"][0]["statements"], 4);
    assert_eq!(summary["files"][1]["covered"], 4);

    let key = summary["key"].as_str().unwrap();
    assert!(key.starts_with(&format!("reports/{}/main/", project.system_id)), "{key}");
    assert_eq!(app.objects.content_type(key).as_deref(), Some("text/plain"));
    assert_eq!(app.records.len(), 1);
}

#[tokio::test]
async fn reports_need_a_known_project_key_and_a_tag() {
    let app = app();
    let project = app.create_project("acme").await;

    let (status, body) = app.send(Method::POST, "/reports?tag=main", REPORT).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["errors"][0], "invalid-project");

    let (status, _) = app
        .send_keyed(Method::POST, "/reports?tag=main", Some("0123456789abcdef0123"), REPORT)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    for uri in ["/reports", "/reports?tag=", "/reports?tag=..%2Fother"] {
        let (status, body) = app.send_keyed(Method::POST, uri, Some(&project.token), REPORT).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(json(&body)["errors"][0], "invalid-tag");
    }

    assert!(app.records.is_empty());
    assert!(app.objects.is_empty());
}

#[tokio::test]
async fn invalid_report_is_rejected_and_not_stored() {
    let app = app();
    let project = app.create_project("acme").await;

    let (status, body) = app
        .send_keyed(Method::POST, "/reports?tag=main", Some(&project.token), "mode: set\nnot a block\n")
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let rejected = json(&body);
    assert_eq!(rejected["errors"][0], "invalid-report: line 2 [not a block]");
    assert_eq!(rejected["data"], serde_json::json!([]));

    assert!(app.records.is_empty());
    assert!(app.objects.is_empty());
}

#[tokio::test]
async fn oversized_report_is_refused() {
    let app = app();
    let project = app.create_project("acme").await;
    let body = format!("mode: set\n{}", "a.go:1.1,2.2 1 1\n".repeat(100));

    let (status, _) = app
        .send_keyed(Method::POST, "/reports?tag=main", Some(&project.token), body)
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.records.is_empty());
}

#[tokio::test]
async fn projects_are_listed_in_pages_without_tokens() {
    let app = app();
    for name in ["alpha", "beta", "gamma"] {
        app.create_project(name).await;
    }

    let (status, body) = app.send(Method::GET, "/projects?offset=1&limit=1", "").await;
    assert_eq!(status, StatusCode::OK);
    let page = json(&body);
    assert_eq!(page["meta"]["total"], 3);
    assert_eq!(page["meta"]["offset"], 1);
    assert_eq!(page["meta"]["limit"], 1);
    assert_eq!(page["data"].as_array().unwrap().len(), 1);
    assert_eq!(page["data"][0]["name"], "beta");
    assert!(page["data"][0].get("token").is_none());

    // Unparsable paging falls back to the first ten.
    let (_, body) = app.send(Method::GET, "/projects?offset=x&limit=-1", "").await;
    let page = json(&body);
    assert_eq!(page["meta"]["offset"], 0);
    assert_eq!(page["meta"]["limit"], 10);
    assert_eq!(page["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn project_names_must_be_unique_and_present() {
    let app = app();
    app.create_project("acme").await;

    let (status, body) = app.send(Method::POST, "/projects", r#"{"name":"acme"}"#).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json(&body)["errors"][0], "duplicate-project");

    for body in [r#"{"name":"  "}"#, r#"{"title":"acme"}"#, "not json"] {
        let (status, res) = app.send(Method::POST, "/projects", body).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
        assert_eq!(json(&res)["errors"][0], "invalid-project");
    }
    assert_eq!(app.projects.len(), 1);
}

#[tokio::test]
async fn project_is_deleted_only_with_its_own_key() {
    let app = app();
    let alpha = app.create_project("alpha").await;
    let beta = app.create_project("beta").await;
    let uri = format!("/projects/{}", alpha.system_id);

    let (status, _) = app.send(Method::DELETE, &uri, "").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.send_keyed(Method::DELETE, &uri, Some(&beta.token), "").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json(&body)["errors"][0], "invalid-project");
    assert_eq!(app.projects.len(), 2);

    let (status, body) = app.send_keyed(Method::DELETE, &uri, Some(&alpha.token), "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["data"], serde_json::json!([]));
    assert_eq!(app.projects.len(), 1);

    // The token went with the project.
    let (status, _) = app.send_keyed(Method::DELETE, &uri, Some(&alpha.token), "").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_checks_and_unknown_paths() {
    let app = app();

    assert_eq!(app.send(Method::GET, "/healthz", "").await, (StatusCode::OK, Bytes::from_static(b"ok")));
    assert_eq!(app.send(Method::GET, "/readyz", "").await, (StatusCode::OK, Bytes::from_static(b"ready")));
    assert_eq!(
        app.send(Method::GET, "/nowhere", "").await,
        (StatusCode::NOT_FOUND, Bytes::from_static(b"not-found"))
    );
}

#[tokio::test]
async fn parameterised_route_beats_an_earlier_catch_all() {
    let routes = RouteTable::new()
        .route(r"^/.*$", HealthEndpoint::Readiness)
        .route(r"^/live/(\d+)$", HealthEndpoint::Liveness);

    let get = |uri: &'static str| {
        http::Request::builder().uri(uri).body(Full::new(Bytes::new())).unwrap()
    };

    let res = dispatch(&routes, get("/live/7")).await;
    assert_eq!(&res.into_body().collect().await.unwrap().to_bytes()[..], b"ok");

    let res = dispatch(&routes, get("/anything")).await;
    assert_eq!(&res.into_body().collect().await.unwrap().to_bytes()[..], b"ready");
}
