//! Out-of-Process Helper
//!
//! On hosts where the device library cannot be loaded in-process, a helper
//! binary reads the device and writes candidate plays to a file. The core
//! only starts it and reacts to the messages it sends back.

use async_trait::async_trait;

use crate::error::Result;

/// A running helper process.
#[async_trait]
pub trait HelperProcess: Send {
    /// `true` once the process has exited.
    fn has_exited(&mut self) -> bool;

    /// Wait for exit and return the exit code, if any.
    async fn wait(&mut self) -> Result<Option<i32>>;
}

/// Starts the helper binary.
#[async_trait]
pub trait HelperLauncher: Send + Sync {
    /// Whether the media-manager application the helper talks to is running.
    async fn is_host_running(&self) -> bool;

    /// Whether the media-manager plugin the helper depends on is installed.
    async fn is_plugin_installed(&self) -> bool;

    async fn launch(&self, args: &[String]) -> Result<Box<dyn HelperProcess>>;
}
