//! Per-device playcount cache.
//!
//! Maps a track's persistent id to the lifetime play count last seen on the
//! device. One SQLite file per physical device, grouped on disk by model
//! family:
//!
//! ```text
//! <runtime_data_dir>/devices/<model_family>/<device_id>/playcounts.db
//! ```
//!
//! The cache is owned by the single active device session, so it carries no
//! locking of its own.

use crate::db::{open_pool, CacheTarget};
use crate::error::{CacheError, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// File name of the cache inside a device directory.
pub const CACHE_FILE_NAME: &str = "playcounts.db";

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS itunes_db (
        persistent_id VARCHAR(32) PRIMARY KEY,
        path TEXT,
        play_count INTEGER
    )
"#;

const CREATE_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS persistent_id_idx ON itunes_db (persistent_id)";

/// Formats a device persistent id as the cache key (uppercase hex).
///
/// ```
/// assert_eq!(core_cache::format_persistent_id(0xbeef), "BEEF");
/// ```
pub fn format_persistent_id(persistent_id: u64) -> String {
    format!("{:X}", persistent_id)
}

/// Where a device's cache file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocation {
    pub model_family: String,
    pub device_id: String,
    pub path: PathBuf,
}

impl CacheLocation {
    /// Resolve the cache path for `(model_family, device_id)` under `root`.
    ///
    /// # Errors
    ///
    /// `InvalidIdentity` if either part is empty or would escape the
    /// devices directory.
    pub fn for_device(root: &Path, model_family: &str, device_id: &str) -> Result<Self> {
        validate_component("model family", model_family)?;
        validate_component("device id", device_id)?;

        let path = root
            .join("devices")
            .join(model_family)
            .join(device_id)
            .join(CACHE_FILE_NAME);

        Ok(Self {
            model_family: model_family.to_string(),
            device_id: device_id.to_string(),
            path,
        })
    }

    /// Directory holding this device's files.
    pub fn device_dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }
}

fn validate_component(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CacheError::InvalidIdentity(format!("{} is empty", what)));
    }
    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(CacheError::InvalidIdentity(format!(
            "{} '{}' is not a valid directory name",
            what, value
        )));
    }
    Ok(())
}

/// One row of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEntry {
    /// Uppercase hex persistent id (see [`format_persistent_id`])
    pub persistent_id: String,
    /// `artist\ttitle\talbum`, for diagnostics only
    pub path: String,
    pub play_count: u32,
}

impl CounterEntry {
    pub fn new(persistent_id: u64, path: impl Into<String>, play_count: u32) -> Self {
        Self {
            persistent_id: format_persistent_id(persistent_id),
            path: path.into(),
            play_count,
        }
    }
}

/// Durable track id -> last seen play count store.
#[async_trait]
pub trait PlaycountStore: Send + Sync {
    /// Previous lifetime play count, 0 if the track was never seen.
    async fn lookup(&self, persistent_id: &str) -> Result<u32>;

    /// Insert-or-replace every entry inside one transaction.
    async fn upsert_all(&self, entries: &[CounterEntry]) -> Result<()>;

    /// Release the handle. Safe to call more than once.
    async fn close(&self);
}

/// SQLite implementation of [`PlaycountStore`].
pub struct SqlitePlaycountCache {
    pool: SqlitePool,
}

impl SqlitePlaycountCache {
    /// Open (creating if absent) the cache file at `location`.
    #[instrument(skip(location), fields(model_family = %location.model_family))]
    pub async fn open(location: &CacheLocation) -> Result<Self> {
        tokio::fs::create_dir_all(location.device_dir()).await?;

        let pool = open_pool(&CacheTarget::file(&location.path)).await?;
        let cache = Self { pool };
        cache.ensure_schema().await?;

        info!("Playcount cache opened");
        Ok(cache)
    }

    /// Open a throwaway cache (useful for testing).
    pub async fn open_in_memory() -> Result<Self> {
        let pool = open_pool(&CacheTarget::Memory).await?;
        let cache = Self { pool };
        cache.ensure_schema().await?;
        Ok(cache)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Number of tracks ever seen on this device.
    pub async fn len(&self) -> Result<u64> {
        self.ensure_open()?;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM itunes_db")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n").max(0) as u64)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl PlaycountStore for SqlitePlaycountCache {
    async fn lookup(&self, persistent_id: &str) -> Result<u32> {
        self.ensure_open()?;

        let row = sqlx::query("SELECT play_count FROM itunes_db WHERE persistent_id = ?")
            .bind(persistent_id)
            .fetch_optional(&self.pool)
            .await?;

        let count = row
            .and_then(|row| row.get::<Option<i64>, _>("play_count"))
            .unwrap_or(0);

        Ok(u32::try_from(count.max(0)).unwrap_or(u32::MAX))
    }

    async fn upsert_all(&self, entries: &[CounterEntry]) -> Result<()> {
        self.ensure_open()?;

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                "INSERT OR REPLACE INTO itunes_db (persistent_id, path, play_count) VALUES (?, ?, ?)",
            )
            .bind(&entry.persistent_id)
            .bind(&entry.path)
            .bind(i64::from(entry.play_count))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(entries = entries.len(), "Playcount baseline committed");
        Ok(())
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_persistent_id_is_uppercase_hex() {
        assert_eq!(format_persistent_id(0), "0");
        assert_eq!(format_persistent_id(0xA1B2C3D4E5F60708), "A1B2C3D4E5F60708");
        assert_eq!(format_persistent_id(255), "FF");
    }

    #[test]
    fn test_cache_location_layout() {
        let location = CacheLocation::for_device(Path::new("/data"), "nano", "000A2700").unwrap();
        assert_eq!(
            location.path,
            PathBuf::from("/data/devices/nano/000A2700/playcounts.db")
        );
        assert_eq!(location.device_dir(), Path::new("/data/devices/nano/000A2700"));
    }

    #[test]
    fn test_cache_location_rejects_bad_identity() {
        let root = Path::new("/data");
        assert!(matches!(
            CacheLocation::for_device(root, "", "id"),
            Err(CacheError::InvalidIdentity(_))
        ));
        assert!(matches!(
            CacheLocation::for_device(root, "nano", "  "),
            Err(CacheError::InvalidIdentity(_))
        ));
        assert!(matches!(
            CacheLocation::for_device(root, "nano", "../etc"),
            Err(CacheError::InvalidIdentity(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_unseen_track_is_zero() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        assert_eq!(cache.lookup("DEADBEEF").await.unwrap(), 0);
        assert!(cache.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();

        cache
            .upsert_all(&[
                CounterEntry::new(1, "A\tOne\tX", 10),
                CounterEntry::new(2, "B\tTwo\tY", 3),
            ])
            .await
            .unwrap();
        cache
            .upsert_all(&[CounterEntry::new(1, "A\tOne\tX", 13)])
            .await
            .unwrap();

        assert_eq!(cache.lookup("1").await.unwrap(), 13);
        assert_eq!(cache.lookup("2").await.unwrap(), 3);
        assert_eq!(cache.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        cache.close().await;
        cache.close().await;

        assert!(matches!(cache.lookup("1").await, Err(CacheError::Closed)));
        assert!(matches!(
            cache.upsert_all(&[]).await,
            Err(CacheError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let location = CacheLocation::for_device(dir.path(), "ipod", "SERIAL1").unwrap();

        let cache = SqlitePlaycountCache::open(&location).await.unwrap();
        cache
            .upsert_all(&[CounterEntry::new(0xABC, "A\tB\tC", 7)])
            .await
            .unwrap();
        cache.close().await;

        assert!(location.path.exists());

        let reopened = SqlitePlaycountCache::open(&location).await.unwrap();
        assert_eq!(reopened.lookup("ABC").await.unwrap(), 7);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_schema_has_index() {
        let cache = SqlitePlaycountCache::open_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'persistent_id_idx'",
        )
        .fetch_one(&cache.pool)
        .await
        .unwrap();
        assert_eq!(row.0, 1);
    }
}
