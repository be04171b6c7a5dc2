//! Persistence for confirmation records and the entities they activate

pub mod confirmation_store;
pub mod memory_store;
#[cfg(feature = "database")]
pub mod postgres_store;

pub use confirmation_store::{ConfirmationStore, StoreError};
pub use memory_store::InMemoryConfirmationStore;
#[cfg(feature = "database")]
pub use postgres_store::PgConfirmationStore;

#[cfg(feature = "database")]
use sqlx::{postgres::PgPoolOptions, PgPool};
#[cfg(feature = "database")]
use std::time::Duration;

#[cfg(feature = "database")]
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[cfg(feature = "database")]
impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Connect to Postgres and apply pending migrations
#[cfg(feature = "database")]
pub async fn init_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Database(format!("migration failed: {}", e)))?;

    tracing::info!(
        max_connections = config.max_connections,
        "Database connection pool initialized"
    );
    Ok(pool)
}
