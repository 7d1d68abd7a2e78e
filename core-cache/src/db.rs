//! SQLite pool for one playcount cache file.
//!
//! A cache has exactly one writer, the active device session, so every pool
//! holds a single connection that lives as long as the pool. File-backed
//! caches run in WAL mode with `synchronous = NORMAL`: a crash may lose the
//! last baseline update but never corrupts the file.

use crate::error::{CacheError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a statement waits on a locked cache file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lookups run once per track per sync.
const STATEMENT_CACHE_CAPACITY: usize = 16;

/// Backing storage for a cache pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheTarget {
    File(PathBuf),
    /// Private database, gone when the pool closes
    Memory,
}

impl CacheTarget {
    pub fn file(path: impl AsRef<Path>) -> Self {
        CacheTarget::File(path.as_ref().to_path_buf())
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = match self {
            CacheTarget::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
            CacheTarget::Memory => SqliteConnectOptions::new().in_memory(true),
        };

        options
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .statement_cache_capacity(STATEMENT_CACHE_CAPACITY)
    }
}

/// Open the single-connection pool for `target` and check it answers.
///
/// # Errors
///
/// `CacheError::Database` if the file cannot be opened or created.
pub async fn open_pool(target: &CacheTarget) -> Result<SqlitePool> {
    debug!(?target, "Opening playcount cache database");

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(target.connect_options())
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open playcount cache database");
            CacheError::Database(e)
        })?;

    sqlx::query("SELECT 1").execute(&pool).await.map_err(|e| {
        warn!(error = %e, "Playcount cache health check failed");
        CacheError::Database(e)
    })?;

    Ok(pool)
}
