//! Application configuration management

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,

    /// Upper bound for `limit` in paged requests
    pub page_limit_max: u32,

    /// Widest allowed `date_start..date_end` window, in days
    pub query_max_days: i64,
}

/// Connection settings for the SQLite pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite connection URL (e.g. `sqlite:./data/flightboard.db` or `sqlite::memory:`)
    pub url: String,

    pub max_connections: u32,

    /// Pool acquire timeout
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:./data/flightboard.db".to_string(),
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            page_limit_max: 100,
            query_max_days: 7,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        // Prefer DATABASE_URL, fall back to DATABASE_PATH
        let url = lookup("DATABASE_URL")
            .or_else(|| lookup("DATABASE_PATH").map(|path| to_sqlite_url(&path)))
            .unwrap_or(defaults.database.url);

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(v) => v.parse().context("Invalid DATABASE_MAX_CONNECTIONS")?,
            None => defaults.database.max_connections,
        };

        let connect_timeout = match lookup("DATABASE_CONNECT_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse().context("Invalid DATABASE_CONNECT_TIMEOUT_SECS")?),
            None => defaults.database.connect_timeout,
        };

        let page_limit_max: u32 = match lookup("PAGE_LIMIT_MAX") {
            Some(v) => v.parse().context("Invalid PAGE_LIMIT_MAX")?,
            None => defaults.page_limit_max,
        };
        if page_limit_max == 0 {
            bail!("PAGE_LIMIT_MAX must be at least 1");
        }

        let query_max_days = match lookup("QUERY_MAX_DAYS") {
            Some(v) => v.parse().context("Invalid QUERY_MAX_DAYS")?,
            None => defaults.query_max_days,
        };

        Ok(Self {
            database: DatabaseConfig {
                url,
                max_connections,
                connect_timeout,
            },
            page_limit_max,
            query_max_days,
        })
    }
}

fn to_sqlite_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite:{}", path)
    }
}
