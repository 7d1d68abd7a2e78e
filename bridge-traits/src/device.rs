//! Mount Watching
//!
//! OS volume-mount notifications normalized into [`MountEvent`]s. Each host
//! transport (UDisks, HAL, ...) implements [`MountWatcher`]; exactly one is
//! active at a time and callers never know which.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::Result;

/// A removable volume that has just been mounted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MountEvent {
    pub mount_path: PathBuf,
    /// Hardware serial. Empty when the transport does not expose one.
    pub device_id: String,
}

impl MountEvent {
    pub fn new(mount_path: impl Into<PathBuf>, device_id: impl Into<String>) -> Self {
        Self {
            mount_path: mount_path.into(),
            device_id: device_id.into(),
        }
    }

    /// A user-chosen path with no hardware id.
    pub fn manual(mount_path: impl Into<PathBuf>) -> Self {
        Self::new(mount_path, String::new())
    }
}

/// Channel the watcher pushes events into.
pub type MountEventSender = mpsc::UnboundedSender<MountEvent>;

/// Mount notification backend.
///
/// # Contract
///
/// - `is_valid()` is decided at construction: `false` means the transport
///   could not be reached and the caller must fall back to manual discovery.
/// - `watch()` returns immediately after subscribing; events arrive on the
///   sender from a background task for as long as the sender is open.
/// - `scan()` enumerates what is mounted right now, filtered exactly like
///   live events.
#[async_trait]
pub trait MountWatcher: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    fn is_valid(&self) -> bool;

    async fn watch(&self, sender: MountEventSender) -> Result<()>;

    async fn scan(&self) -> Result<Vec<MountEvent>>;
}
