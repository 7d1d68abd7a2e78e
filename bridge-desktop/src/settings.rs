//! SQLite-backed preferences.
//!
//! Holds the device-scrobbling toggles (enable flags, always-ask, excluded
//! folders) in one key-value table. Every value is stored as text next to
//! the kind it was written as, and reading it back as another kind fails
//! instead of guessing.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SettingsStore,
    time::{Clock, SystemClock},
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        value_type TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Bool,
    Integer,
}

impl ValueKind {
    fn as_str(self) -> &'static str {
        match self {
            ValueKind::Text => "string",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "i64",
        }
    }
}

fn db_error(action: &'static str) -> impl Fn(sqlx::Error) -> BridgeError {
    move |e| BridgeError::DatabaseError(format!("Failed to {}: {}", action, e))
}

pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Open (creating if absent) the settings database at `db_path`.
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(db_error("open settings database"))?;

        debug!(path = %db_path.display(), "Settings store opened");
        Self::with_pool(pool).await
    }

    /// A store that lives only as long as the value.
    pub async fn in_memory() -> Result<Self> {
        // One connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_error("open settings database"))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(db_error("create settings table"))?;
        Ok(Self { pool })
    }

    async fn write(&self, key: &str, value: &str, kind: ValueKind) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, value_type, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                value_type = excluded.value_type,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(kind.as_str())
        .bind(SystemClock.unix_timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_error("store setting"))?;

        debug!(key, kind = kind.as_str(), "Setting stored");
        Ok(())
    }

    async fn read_raw(&self, key: &str, kind: ValueKind) -> Result<Option<String>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT value, value_type FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("read setting"))?;

        let Some((value, stored_kind)) = row else {
            return Ok(None);
        };

        if stored_kind != kind.as_str() {
            warn!(key, expected = kind.as_str(), actual = %stored_kind, "Setting has a different type");
            return Err(BridgeError::OperationFailed(format!(
                "Setting '{}' is a {}, not a {}",
                key,
                stored_kind,
                kind.as_str()
            )));
        }
        Ok(Some(value))
    }

    async fn read<T>(&self, key: &str, kind: ValueKind) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.read_raw(key, kind)
            .await?
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    BridgeError::OperationFailed(format!("Setting '{}' is corrupt: {}", key, e))
                })
            })
            .transpose()
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.write(key, value, ValueKind::Text).await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.read_raw(key, ValueKind::Text).await
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.write(key, &value.to_string(), ValueKind::Bool).await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.read(key, ValueKind::Bool).await
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.write(key, &value.to_string(), ValueKind::Integer).await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.read(key, ValueKind::Integer).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete setting"))?;
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("look up setting"))?;
        Ok(found.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT key FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("list settings"))
    }
}
