//! # Database Connection Pool
//!
//! SQLite pool construction for the tracked-media index.
//!
//! WAL mode is enabled for concurrency (multiple readers, one writer) and
//! the pool is kept small: the index is a metadata store, not a data path.
//!
//! For tests, use an in-memory database:
//!
//! ```rust,ignore
//! let pool = create_test_pool().await?;
//! ```

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::error::{IndexError, Result};

/// Database configuration for the SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL, e.g. `sqlite:tracked-media.db`
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// Configuration for a database file at `path`
    pub fn new(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            database_url: format!("sqlite:{}", path.as_ref().display()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Create a connection pool with WAL journaling.
///
/// The database file is created when missing.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(|e| IndexError::Database(format!("invalid database url: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await?;

    debug!(url = %config.database_url, "Opened tracked-media database");
    Ok(pool)
}

/// In-memory pool for tests.
///
/// Pinned to a single connection: each SQLite `:memory:` connection is its
/// own database, so a wider pool would scatter state.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| IndexError::Database(e.to_string()))?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}
