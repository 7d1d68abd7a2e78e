//! HAL mount watcher
//!
//! HAL reports devices by UDI and announces mounts as property changes on
//! the volume, so the watcher keeps track of the removable volumes it has
//! seen and re-reads them when `volume.is_mounted` changes.

use async_trait::async_trait;
use bridge_traits::{
    device::{MountEvent, MountEventSender, MountWatcher},
    error::Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

pub const HAL_SERVICE: &str = "org.freedesktop.Hal";

/// Property whose change announces a mount.
pub const MOUNTED_PROPERTY: &str = "volume.is_mounted";

/// Volume properties read from `org.freedesktop.Hal.Device`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HalVolume {
    /// `info.category`
    pub category: String,
    /// `volume.is_partition`
    pub is_partition: bool,
    /// `volume.ignore`
    pub ignore: bool,
    /// `block.storage_device`: UDI of the drive holding the volume
    pub storage_device: String,
    /// `volume.is_mounted`
    pub is_mounted: bool,
    /// `volume.mount_point`
    pub mount_point: String,
}

impl HalVolume {
    fn is_candidate(&self) -> bool {
        self.category == "volume" && !self.is_partition && !self.ignore
    }
}

/// Drive properties for a volume's storage device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HalStorage {
    /// `storage.removable`
    pub removable: bool,
    /// `storage.hotpluggable`
    pub hotpluggable: bool,
    /// `storage.serial`
    pub serial: String,
}

/// Signals from the HAL manager and the watched volumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalSignal {
    DeviceAdded(String),
    DeviceRemoved(String),
    PropertyModified { udi: String, keys: Vec<String> },
}

/// Raw access to the HAL system-bus service.
#[async_trait]
pub trait HalTransport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// `FindDeviceByCapability("volume")`
    async fn find_volumes(&self) -> Result<Vec<String>>;

    async fn volume(&self, udi: &str) -> Result<Option<HalVolume>>;

    async fn storage(&self, udi: &str) -> Result<Option<HalStorage>>;

    async fn signals(&self) -> Result<mpsc::UnboundedReceiver<HalSignal>>;
}

pub struct HalMountWatcher {
    transport: Arc<dyn HalTransport>,
    /// Removable volumes by UDI, with their drive serial.
    tracked: Arc<Mutex<HashMap<String, String>>>,
}

impl HalMountWatcher {
    pub fn new(transport: Arc<dyn HalTransport>) -> Self {
        Self {
            transport,
            tracked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn mounted(volume: &HalVolume, serial: &str) -> Option<MountEvent> {
        if !volume.is_mounted || volume.mount_point.is_empty() {
            return None;
        }
        Some(MountEvent::new(&volume.mount_point, serial))
    }

    /// Start tracking `udi` if it is a removable volume.
    ///
    /// Returns its mount event when it is already mounted.
    async fn add(
        transport: &dyn HalTransport,
        tracked: &Mutex<HashMap<String, String>>,
        udi: &str,
    ) -> Result<Option<MountEvent>> {
        if tracked.lock().await.contains_key(udi) {
            return Ok(None);
        }

        let Some(volume) = transport.volume(udi).await? else {
            return Ok(None);
        };
        if !volume.is_candidate() {
            return Ok(None);
        }
        let Some(storage) = transport.storage(&volume.storage_device).await? else {
            return Ok(None);
        };
        if !(storage.removable || storage.hotpluggable) {
            return Ok(None);
        }

        tracked
            .lock()
            .await
            .insert(udi.to_string(), storage.serial.clone());
        Ok(Self::mounted(&volume, &storage.serial))
    }

    async fn handle(
        transport: &dyn HalTransport,
        tracked: &Mutex<HashMap<String, String>>,
        signal: HalSignal,
    ) -> Result<Option<MountEvent>> {
        match signal {
            HalSignal::DeviceAdded(udi) => Self::add(transport, tracked, &udi).await,
            HalSignal::DeviceRemoved(udi) => {
                tracked.lock().await.remove(&udi);
                Ok(None)
            }
            HalSignal::PropertyModified { udi, keys } => {
                if !keys.iter().any(|k| k == MOUNTED_PROPERTY) {
                    return Ok(None);
                }
                let Some(serial) = tracked.lock().await.get(&udi).cloned() else {
                    return Ok(None);
                };
                let volume = transport.volume(&udi).await?;
                Ok(volume.and_then(|v| Self::mounted(&v, &serial)))
            }
        }
    }
}

#[async_trait]
impl MountWatcher for HalMountWatcher {
    fn backend_name(&self) -> &'static str {
        "hal"
    }

    fn is_valid(&self) -> bool {
        self.transport.is_connected()
    }

    async fn watch(&self, sender: MountEventSender) -> Result<()> {
        let mut signals = self.transport.signals().await?;
        let transport = Arc::clone(&self.transport);
        let tracked = Arc::clone(&self.tracked);

        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                match Self::handle(transport.as_ref(), &tracked, signal).await {
                    Ok(Some(event)) => {
                        debug!(mount_path = %event.mount_path.display(), "HAL volume mounted");
                        if sender.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Could not read HAL device"),
                }
            }
            debug!("HAL watch stopped");
        });

        Ok(())
    }

    /// Forget tracked volumes and enumerate again.
    async fn scan(&self) -> Result<Vec<MountEvent>> {
        if !self.is_valid() {
            warn!("HAL service not reachable, skipping scan");
            return Ok(Vec::new());
        }

        self.tracked.lock().await.clear();

        let mut events = Vec::new();
        for udi in self.transport.find_volumes().await? {
            match Self::add(self.transport.as_ref(), &self.tracked, &udi).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => debug!(udi = %udi, error = %e, "Could not read HAL volume"),
            }
        }
        Ok(events)
    }
}
