//! UDisks mount watcher
//!
//! Listens for `DeviceChanged` on `org.freedesktop.UDisks` and reports
//! removable volumes that have a mount path.

use async_trait::async_trait;
use bridge_traits::{
    device::{MountEvent, MountEventSender, MountWatcher},
    error::Result,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const UDISKS_SERVICE: &str = "org.freedesktop.UDisks";

/// Properties of one `org.freedesktop.UDisks.Device` object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdisksDevice {
    pub object_path: String,
    /// `DeviceIsSystemInternal`
    pub is_system_internal: bool,
    /// `DevicePresentationHide`
    pub presentation_hide: bool,
    /// `DeviceIsPartitionTable`
    pub is_partition_table: bool,
    /// `DeviceMountPaths`
    pub mount_paths: Vec<String>,
    /// `DriveSerial`
    pub drive_serial: String,
}

impl UdisksDevice {
    /// The mount event for this device, if it passes the volume filter.
    pub fn mount_event(&self) -> Option<MountEvent> {
        if self.is_system_internal || self.presentation_hide || self.is_partition_table {
            return None;
        }
        let mount_path = self.mount_paths.first().filter(|p| !p.is_empty())?;
        Some(MountEvent::new(mount_path, self.drive_serial.clone()))
    }
}

/// Raw access to the UDisks system-bus service.
#[async_trait]
pub trait UdisksTransport: Send + Sync {
    /// Whether the service answered when the transport was created.
    fn is_connected(&self) -> bool;

    /// `EnumerateDevices`: object paths of every known device.
    async fn enumerate_devices(&self) -> Result<Vec<String>>;

    /// Read a device's properties. `None` when the object is gone.
    async fn device(&self, object_path: &str) -> Result<Option<UdisksDevice>>;

    /// Subscribe to `DeviceChanged`; yields object paths.
    async fn device_changed(&self) -> Result<mpsc::UnboundedReceiver<String>>;
}

pub struct UdisksMountWatcher {
    transport: Arc<dyn UdisksTransport>,
}

impl UdisksMountWatcher {
    pub fn new(transport: Arc<dyn UdisksTransport>) -> Self {
        Self { transport }
    }

    async fn inspect(transport: &dyn UdisksTransport, object_path: &str) -> Option<MountEvent> {
        match transport.device(object_path).await {
            Ok(Some(device)) => device.mount_event(),
            Ok(None) => None,
            Err(e) => {
                debug!(object_path, error = %e, "Could not read UDisks device");
                None
            }
        }
    }
}

#[async_trait]
impl MountWatcher for UdisksMountWatcher {
    fn backend_name(&self) -> &'static str {
        "udisks"
    }

    fn is_valid(&self) -> bool {
        self.transport.is_connected()
    }

    async fn watch(&self, sender: MountEventSender) -> Result<()> {
        let mut changes = self.transport.device_changed().await?;
        let transport = Arc::clone(&self.transport);

        tokio::spawn(async move {
            while let Some(object_path) = changes.recv().await {
                let Some(event) = Self::inspect(transport.as_ref(), &object_path).await else {
                    continue;
                };
                debug!(mount_path = %event.mount_path.display(), "UDisks volume mounted");
                if sender.send(event).is_err() {
                    break;
                }
            }
            debug!("UDisks watch stopped");
        });

        Ok(())
    }

    async fn scan(&self) -> Result<Vec<MountEvent>> {
        if !self.is_valid() {
            warn!("UDisks service not reachable, skipping scan");
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for object_path in self.transport.enumerate_devices().await? {
            if let Some(event) = Self::inspect(self.transport.as_ref(), &object_path).await {
                events.push(event);
            }
        }
        Ok(events)
    }
}
