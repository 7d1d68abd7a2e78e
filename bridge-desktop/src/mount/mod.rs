//! Mount Watching
//!
//! Two interchangeable [`MountWatcher`] backends, one per system-bus
//! notification service:
//!
//! - [`UdisksMountWatcher`] over `org.freedesktop.UDisks`
//! - [`HalMountWatcher`] over `org.freedesktop.Hal`
//!
//! Both apply the same volume filter: system-internal, hidden,
//! partition-table and unmounted volumes are never reported. The bus
//! connection itself is supplied by the host through [`UdisksTransport`]
//! and [`HalTransport`].

mod hal;
mod udisks;

pub use hal::{
    HalMountWatcher, HalSignal, HalStorage, HalTransport, HalVolume, HAL_SERVICE,
    MOUNTED_PROPERTY,
};
pub use udisks::{UdisksDevice, UdisksMountWatcher, UdisksTransport, UDISKS_SERVICE};

use bridge_traits::device::MountWatcher;
use std::sync::Arc;
use tracing::{debug, info};

/// Which backend the platform prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountBackend {
    Udisks,
    Hal,
}

impl MountBackend {
    /// UDisks on Linux, HAL elsewhere.
    pub fn for_platform() -> Self {
        if cfg!(target_os = "linux") {
            MountBackend::Udisks
        } else {
            MountBackend::Hal
        }
    }
}

/// Transports the host was able to open.
#[derive(Default, Clone)]
pub struct MountTransports {
    pub udisks: Option<Arc<dyn UdisksTransport>>,
    pub hal: Option<Arc<dyn HalTransport>>,
}

/// Build the one watcher for `backend`.
///
/// Returns `None` when that backend's transport is missing or unreachable;
/// the caller then falls back to manual discovery.
pub fn select_mount_watcher(
    backend: MountBackend,
    transports: &MountTransports,
) -> Option<Arc<dyn MountWatcher>> {
    let watcher: Arc<dyn MountWatcher> = match backend {
        MountBackend::Udisks => Arc::new(UdisksMountWatcher::new(transports.udisks.clone()?)),
        MountBackend::Hal => Arc::new(HalMountWatcher::new(transports.hal.clone()?)),
    };

    if watcher.is_valid() {
        info!(backend = watcher.backend_name(), "Mount watcher selected");
        Some(watcher)
    } else {
        debug!(
            backend = watcher.backend_name(),
            "Mount watcher unavailable, manual discovery only"
        );
        None
    }
}
