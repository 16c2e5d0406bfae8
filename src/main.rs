//! Flightboard - bootstrap and one-shot import
//!
//! Loads configuration, prepares the database schema and validates every
//! declared query alias. With `--import-flights <file>` a JSON array of
//! flight payloads is upserted in one cascading transaction.

use std::path::Path;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flightboard::cli::CliOptions;
use flightboard::config::Config;
use flightboard::db::{Database, REGISTRY};
use flightboard::services::{Catalog, FlightPayload, validate_query_schemas};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let options = CliOptions::from_args();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flightboard=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Flightboard");
    tracing::info!(database = %config.database.url, "Configuration loaded");

    ensure_database_dir(&config.database.url)?;
    let db = Database::connect_with_retry(&config.database, config.database.connect_timeout).await;
    db.sync_schema().await?;

    let aliases = validate_query_schemas(&REGISTRY).context("Query alias validation failed")?;
    tracing::info!(aliases, "Query aliases validated");

    if options.validate_only {
        return Ok(());
    }

    if let Some(path) = &options.import_flights {
        let catalog = Catalog::new(db.clone(), &config);
        import_flights(&catalog, path).await?;
    }

    db.pool().close().await;
    Ok(())
}

async fn import_flights(catalog: &Catalog, path: &Path) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let flights: Vec<FlightPayload> =
        serde_json::from_str(&content).with_context(|| format!("Invalid flight payloads in {}", path.display()))?;

    let changes = catalog
        .upsert_flights(&flights)
        .await
        .context("Flight import failed")?;

    tracing::info!(
        file = %path.display(),
        flights = flights.len(),
        changes = changes.len(),
        "Flight import complete"
    );
    Ok(())
}

/// SQLite creates the database file but not its directory.
fn ensure_database_dir(url: &str) -> anyhow::Result<()> {
    let Some(path) = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")) else {
        return Ok(());
    };
    if path.starts_with(':') {
        return Ok(());
    }
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}
