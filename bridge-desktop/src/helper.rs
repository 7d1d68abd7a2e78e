//! Helper process launcher backed by `tokio::process`.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    helper::{HelperLauncher, HelperProcess},
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

type HostProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Starts the device-reading helper binary.
///
/// Whether the media-manager host is running is platform specific and is
/// answered by a probe the application installs; without one the host is
/// reported as not running and the helper is never started.
pub struct ProcessHelperLauncher {
    program: PathBuf,
    plugin_path: Option<PathBuf>,
    host_probe: HostProbe,
}

impl ProcessHelperLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            plugin_path: None,
            host_probe: Arc::new(|| false),
        }
    }

    /// Require this file to exist before the helper may run.
    pub fn with_plugin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugin_path = Some(path.into());
        self
    }

    pub fn with_host_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.host_probe = Arc::new(probe);
        self
    }
}

#[async_trait]
impl HelperLauncher for ProcessHelperLauncher {
    async fn is_host_running(&self) -> bool {
        (self.host_probe)()
    }

    async fn is_plugin_installed(&self) -> bool {
        match &self.plugin_path {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => true,
        }
    }

    async fn launch(&self, args: &[String]) -> Result<Box<dyn HelperProcess>> {
        let child = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::OperationFailed(format!(
                    "Failed to start helper {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        debug!(program = %self.program.display(), pid = ?child.id(), "Helper started");
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl HelperProcess for ChildProcess {
    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "Helper exited");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Could not poll helper process");
                true
            }
        }
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }
}
