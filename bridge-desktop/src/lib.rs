//! # Desktop Bridges
//!
//! Host implementations of the bridge traits for desktop platforms:
//!
//! - mount watchers over UDisks (Linux) and HAL (older Unix hosts), chosen
//!   with [`select_mount_watcher`]; the D-Bus connection itself is supplied
//!   by the application through [`UdisksTransport`] / [`HalTransport`]
//! - [`SqliteSettingsStore`] for preferences
//! - [`TokioBackgroundExecutor`] for helper polling timers
//! - [`ProcessHelperLauncher`] for the out-of-process device reader
//!
//! ```ignore
//! let settings = SqliteSettingsStore::new(default_runtime_data_dir().join("settings.db")).await?;
//! let watcher = select_mount_watcher(MountBackend::for_platform(), &transports);
//! ```

mod background;
mod helper;
mod mount;
mod settings;

pub use background::TokioBackgroundExecutor;
pub use helper::ProcessHelperLauncher;
pub use mount::{
    select_mount_watcher, HalMountWatcher, HalSignal, HalStorage, HalTransport, HalVolume,
    MountBackend, MountTransports, UdisksDevice, UdisksMountWatcher, UdisksTransport,
    HAL_SERVICE, MOUNTED_PROPERTY, UDISKS_SERVICE,
};
pub use settings::SqliteSettingsStore;

use std::path::PathBuf;

const APP_DIR_NAME: &str = "device-scrobbler";

/// Platform data directory for the runtime data root.
///
/// Falls back to `~/.local/share` and finally the working directory.
pub fn default_runtime_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_runtime_data_dir() {
        assert!(default_runtime_data_dir().ends_with(APP_DIR_NAME));
    }
}
