use std::sync::Arc;

use anyhow::{Context, Result, bail};
use coverhub::api::{FileDownload, FileUpload, ProjectEndpoint, ReportEndpoint};
use coverhub::config::{Config, StorageDriver};
use coverhub::health::HealthEndpoint;
use coverhub::projects::{MemoryProjects, PgProjects, ProjectStore};
use coverhub::store::{
    FileRecords, FileStore, MemoryFileRecords, MemoryObjectStorage, ObjectStorage, PgFileRecords, S3ObjectStorage,
};
use coverhub::{BoxedEndpoint, RouteTable, Server, db};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        driver = ?config.storage.driver,
        "Starting coverhub"
    );

    let (records, projects) = persistence(&config).await?;
    let store = FileStore::new(records, objects(&config).await?, config.store_options());
    let routes = routes(&config, store, projects).context("Failed to build route table")?;

    Server::bind(config.service.address)
        .serve(routes)
        .await
        .context("Listener failed")?;

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

async fn persistence(config: &Config) -> Result<(Arc<dyn FileRecords>, Arc<dyn ProjectStore>)> {
    match config.storage.driver {
        StorageDriver::Memory => {
            let records: Arc<dyn FileRecords> = Arc::new(MemoryFileRecords::new());
            let projects: Arc<dyn ProjectStore> = Arc::new(MemoryProjects::new());
            Ok((records, projects))
        }
        StorageDriver::S3 => {
            let Some(database) = &config.database else {
                bail!("the s3 driver needs a [database] section");
            };
            let pool = db::connect(database)
                .await
                .context("Failed to connect to database")?;

            // Run migrations if enabled
            if database.run_migrations {
                db::run_migrations(&pool)
                    .await
                    .context("Failed to run database migrations")?;
            }
            let records: Arc<dyn FileRecords> = Arc::new(PgFileRecords::new(pool.clone()));
            let projects: Arc<dyn ProjectStore> = Arc::new(PgProjects::new(pool));
            Ok((records, projects))
        }
    }
}

async fn objects(config: &Config) -> Result<Arc<dyn ObjectStorage>> {
    match config.storage.driver {
        StorageDriver::Memory => Ok(Arc::new(MemoryObjectStorage::new())),
        StorageDriver::S3 => {
            let Some(s3) = &config.s3 else {
                bail!("the s3 driver needs an [s3] section");
            };
            let storage = S3ObjectStorage::new(s3)
                .await
                .with_download_limit(config.storage.max_download_bytes);
            Ok(Arc::new(storage))
        }
    }
}

fn routes(config: &Config, store: FileStore, projects: Arc<dyn ProjectStore>) -> Result<RouteTable> {
    let project_endpoint: BoxedEndpoint = Arc::new(ProjectEndpoint::new(Arc::clone(&projects)));
    let routes = RouteTable::new()
        .try_route(
            r"^/files/(?P<directory>[\w\-/]+)/(?P<id>[0-9a-f\-]{36})$",
            FileDownload::new(store.clone()),
        )?
        .try_route(r"^/files/(?P<directory>[\w\-/]+)$", FileUpload::new(store.clone()))?
        .try_route(
            r"^/reports$",
            ReportEndpoint::new(store, projects, config.storage.max_report_bytes),
        )?
        .try_route_shared(r"^/projects$", project_endpoint.clone())?
        .try_route_shared(r"^/projects/(?P<id>[\w\-]+)$", project_endpoint)?
        .try_route(r"^/healthz$", HealthEndpoint::Liveness)?
        .try_route(r"^/readyz$", HealthEndpoint::Readiness)?;
    Ok(routes)
}
