//! SQLite pool for the metadata store.
//!
//! File-backed stores run in WAL mode so crawler lookups never wait on a
//! worker's write. Migrations are embedded and applied on every open.

use crate::{Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the store lives and how many connections may touch it.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    /// How long a caller waits for a pooled connection.
    pub acquire_timeout: Duration,
    /// How long a statement waits on SQLite's write lock.
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.into().display()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Every connection to `:memory:` opens its own database, so the pool
    /// is pinned to one connection.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::new("")
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.database_url.ends_with(":memory:")
    }
}

/// Open the pool, apply migrations and check that a statement runs.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    let in_memory = config.is_in_memory();
    info!(database_url = %config.database_url, "Opening metadata store");

    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .journal_mode(if in_memory {
            SqliteJournalMode::Memory
        } else {
            SqliteJournalMode::Wal
        })
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(config.busy_timeout);

    let max_connections = if in_memory { 1 } else { config.max_connections.max(1) };
    let mut pool_options = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(max_connections)
        .acquire_timeout(config.acquire_timeout);
    if in_memory {
        // Dropping the last connection would drop the database with it.
        pool_options = pool_options.max_lifetime(None).idle_timeout(None);
    }

    let pool = pool_options.connect_with(options).await.map_err(|e| {
        warn!(error = %e, "Cannot open metadata store");
        StoreError::Database(e)
    })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        warn!(error = %e, "Metadata store migration failed");
        StoreError::Migration(e.to_string())
    })?;
    sqlx::query("SELECT 1").execute(&pool).await?;

    debug!(connections = pool.size(), "Metadata store ready");
    Ok(pool)
}

/// In-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}
