//! Device discovery: cold start, live mount notifications and the manual
//! "scrobble now" trigger, all feeding the [`DeviceCoordinator`].

use crate::coordinator::DeviceCoordinator;
use crate::error::Result;
use bridge_traits::{ConfirmationPort, MountEvent, MountWatcher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

pub struct DeviceDiscovery {
    watcher: Option<Arc<dyn MountWatcher>>,
    confirmation: Arc<dyn ConfirmationPort>,
    coordinator: DeviceCoordinator,
}

impl DeviceDiscovery {
    pub fn new(
        watcher: Option<Arc<dyn MountWatcher>>,
        confirmation: Arc<dyn ConfirmationPort>,
        coordinator: DeviceCoordinator,
    ) -> Self {
        Self {
            watcher,
            confirmation,
            coordinator,
        }
    }

    fn valid_watcher(&self) -> Option<&Arc<dyn MountWatcher>> {
        self.watcher.as_ref().filter(|w| w.is_valid())
    }

    /// Whether live mount notifications are available.
    pub fn has_watcher(&self) -> bool {
        self.valid_watcher().is_some()
    }

    /// Replay currently mounted devices, then follow mount notifications.
    ///
    /// Returns the forwarding task, or `None` when no valid watcher exists
    /// and discovery is manual only.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<Option<JoinHandle<()>>> {
        let Some(watcher) = self.valid_watcher() else {
            debug!("No usable mount watcher, manual discovery only");
            return Ok(None);
        };

        let queued = self.scan(watcher.as_ref()).await?;
        info!(backend = watcher.backend_name(), queued, "Startup scan finished");

        let (sender, mut receiver) = mpsc::unbounded_channel::<MountEvent>();
        watcher.watch(sender).await?;

        let coordinator = self.coordinator.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                debug!(mount_path = %event.mount_path.display(), "Mount notification");
                if coordinator.enqueue(event).is_err() {
                    break;
                }
            }
            debug!("Mount notification forwarding stopped");
        });

        Ok(Some(forwarder))
    }

    /// Manual trigger.
    ///
    /// Rescans when a watcher exists; otherwise asks the user where the
    /// device is mounted. A cancelled prompt is not an error.
    #[instrument(skip(self))]
    pub async fn scrobble_now(&self) -> Result<()> {
        if let Some(watcher) = self.valid_watcher() {
            let queued = self.scan(watcher.as_ref()).await?;
            debug!(queued, "Manual rescan finished");
            return Ok(());
        }

        match self.confirmation.request_mount_path().await? {
            Some(path) => {
                info!(mount_path = %path.display(), "Processing user-selected mount path");
                self.coordinator.enqueue(MountEvent::manual(path))
            }
            None => {
                debug!("Mount path prompt cancelled");
                Ok(())
            }
        }
    }

    async fn scan(&self, watcher: &dyn MountWatcher) -> Result<usize> {
        let events = match watcher.scan().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, backend = watcher.backend_name(), "Mount scan failed");
                return Err(e.into());
            }
        };

        let count = events.len();
        for event in events {
            self.coordinator.enqueue(event)?;
        }
        Ok(count)
    }
}
