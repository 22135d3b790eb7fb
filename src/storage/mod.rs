pub mod postgres;
pub mod sqlite;
pub mod trait_def;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DatabaseBackend, DatabaseConfig};

pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{DayWindow, Storage};

/// Open the pool for the configured backend.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Storage>> {
    let acquire_timeout = Duration::from_secs(config.acquire_timeout_secs);

    let storage: Arc<dyn Storage> = match config.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.url, config.max_connections, acquire_timeout).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.url, config.max_connections, acquire_timeout).await?,
        ),
    };

    Ok(storage)
}
