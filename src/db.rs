//! PostgreSQL pool shared by the file records and the project store.

use sqlx::migrate::MigrateError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;

/// Connect a pool sized and timed from configuration
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = pool_options(config).connect(&config.url).await?;

    info!("Connected to PostgreSQL database");

    Ok(pool)
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .idle_timeout(Some(config.idle_timeout()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::projects::PgProjects;
    use crate::store::PgFileRecords;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            url: "postgres://coverhub@localhost/coverhub".to_owned(),
            max_connections: 4,
            min_connections: 0,
            connect_timeout_secs: 3,
            idle_timeout_secs: 60,
            run_migrations: false,
        }
    }

    #[test]
    fn pool_follows_configuration() {
        let options = pool_options(&config());
        assert_eq!(options.get_max_connections(), 4);
        assert_eq!(options.get_min_connections(), 0);
        assert_eq!(options.get_acquire_timeout(), Duration::from_secs(3));
        assert_eq!(options.get_idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn stores_share_one_pool() {
        let config = config();
        // Lazy, so no connection is attempted.
        let pool = pool_options(&config).connect_lazy(&config.url).unwrap();

        let _records = PgFileRecords::new(pool.clone());
        let _projects = PgProjects::new(pool.clone());
        assert_eq!(pool.size(), 0);
    }
}
