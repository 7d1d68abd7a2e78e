//! # Playcount Cache
//!
//! Persistent per-device store of the last seen lifetime play count for
//! every track, used to turn a device's absolute counters into new plays.
//!
//! ## Overview
//!
//! This crate manages:
//! - The on-disk layout of cache files (`devices/<family>/<id>/playcounts.db`)
//! - SQLite pooling for a single-writer cache file
//! - Transactional baseline updates after each sync
//!
//! ## Usage
//!
//! ```ignore
//! use core_cache::{CacheLocation, CounterEntry, PlaycountStore, SqlitePlaycountCache};
//!
//! let location = CacheLocation::for_device(&data_dir, "nano", "000A27001B5C1F2E")?;
//! let cache = SqlitePlaycountCache::open(&location).await?;
//! let previous = cache.lookup("A1B2C3D4E5F60708").await?;
//! cache.upsert_all(&[CounterEntry::new(0xA1B2C3D4E5F60708, "Artist\tTitle\tAlbum", 13)]).await?;
//! cache.close().await;
//! ```

pub mod db;
pub mod error;
pub mod playcount;

pub use db::CacheTarget;
pub use error::{CacheError, Result};
pub use playcount::{
    format_persistent_id, CacheLocation, CounterEntry, PlaycountStore, SqlitePlaycountCache,
    CACHE_FILE_NAME,
};
