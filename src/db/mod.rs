//! Database connection, entity declarations and schema bootstrap

pub mod changelog;
pub mod entities;
pub mod schema_sync;
pub mod sqlite_helpers;
pub mod unicode;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};

pub use changelog::FlightChangelogSink;
pub use entities::REGISTRY;
pub use schema_sync::{SchemaSyncResult, sync_all_entity_schemas};

use crate::config::DatabaseConfig;

/// Database wrapper providing connection pool access
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    fn connect_options(url: &str) -> Result<SqliteConnectOptions> {
        Ok(SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL '{}'", url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .pragma("case_sensitive_like", "ON")
            .collation(unicode::NOCASE_COLLATION, unicode::compare_nocase))
    }

    /// Pool options shared by every connection: Unicode folding is installed
    /// before a connection is handed out.
    fn pool_options() -> SqlitePoolOptions {
        SqlitePoolOptions::new().after_connect(|conn, _meta| {
            Box::pin(async move { unicode::register_functions(conn).await })
        })
    }

    /// Create a new database connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = Self::pool_options()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(Self::connect_options(&config.url)?)
            .await
            .with_context(|| format!("Failed to connect to {}", config.url))?;

        Ok(Self { pool })
    }

    /// Create a new database connection pool with retry logic
    /// Retries every `retry_interval` until successful
    pub async fn connect_with_retry(config: &DatabaseConfig, retry_interval: Duration) -> Self {
        loop {
            match Self::connect(config).await {
                Ok(db) => return db,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_secs = retry_interval.as_secs(),
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    /// Private in-memory database on a single long-lived connection
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = Self::pool_options()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(Self::connect_options("sqlite::memory:")?)
            .await
            .context("Failed to open in-memory database")?;

        Ok(Self { pool })
    }

    /// Create missing tables and columns for every registered entity
    pub async fn sync_schema(&self) -> Result<SchemaSyncResult> {
        let result = sync_all_entity_schemas(&self.pool, &REGISTRY).await;
        if !result.is_ok() {
            anyhow::bail!("Schema sync failed: {}", result.errors.join("; "));
        }
        tracing::info!(
            service = "database",
            tables_created = result.tables_created.len(),
            columns_added = result.columns_added.len(),
            "Schema synchronized"
        );
        Ok(result)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }
}
