//! Scrobble policy snapshot.
//!
//! Config defaults overlaid with the user's current settings, taken once at
//! session start and handed to the session by value.

use bridge_traits::{SettingsStore, TrackRecord};
use core_runtime::config::{DeviceScrobbleConfig, FeatureFlags};
use std::path::PathBuf;
use tracing::warn;

/// Settings key: process devices at all.
pub const DEVICE_SCROBBLING_KEY: &str = "device_scrobbling_enabled";
/// Settings key: scrobble podcast episodes.
pub const PODCAST_SCROBBLING_KEY: &str = "podcast_scrobbling";
/// Settings key: confirm every sync.
pub const ALWAYS_ASK_KEY: &str = "always_ask";
/// Settings key: JSON array of folders never scrobbled.
pub const EXCLUDED_FOLDERS_KEY: &str = "excluded_folders";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrobblePolicy {
    pub device_scrobbling_enabled: bool,
    pub podcast_scrobbling: bool,
    pub always_ask: bool,
    pub excluded_folders: Vec<PathBuf>,
    pub confirmation_threshold: usize,
    pub anomaly_threshold: usize,
}

impl ScrobblePolicy {
    /// Policy from configuration alone.
    pub fn from_config(device: &DeviceScrobbleConfig, features: &FeatureFlags) -> Self {
        Self {
            device_scrobbling_enabled: features.enable_device_scrobbling,
            podcast_scrobbling: features.enable_podcast_scrobbling,
            always_ask: features.always_ask,
            excluded_folders: device.excluded_folders.clone(),
            confirmation_threshold: device.confirmation_threshold,
            anomaly_threshold: device.anomaly_threshold,
        }
    }

    /// Overlay stored user settings on top of `self`.
    ///
    /// A setting that cannot be read keeps its configured default.
    pub async fn with_settings(mut self, store: &dyn SettingsStore) -> Self {
        if let Some(enabled) = read_bool(store, DEVICE_SCROBBLING_KEY).await {
            self.device_scrobbling_enabled = enabled;
        }
        if let Some(enabled) = read_bool(store, PODCAST_SCROBBLING_KEY).await {
            self.podcast_scrobbling = enabled;
        }
        if let Some(enabled) = read_bool(store, ALWAYS_ASK_KEY).await {
            self.always_ask = enabled;
        }

        match store.get_string(EXCLUDED_FOLDERS_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<PathBuf>>(&raw) {
                Ok(folders) => self.excluded_folders = folders,
                Err(e) => warn!(error = %e, "Ignoring malformed excluded folder list"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, key = EXCLUDED_FOLDERS_KEY, "Failed to read setting"),
        }

        self
    }

    /// Convenience for `from_config(..).with_settings(store)`.
    pub async fn load(
        device: &DeviceScrobbleConfig,
        features: &FeatureFlags,
        store: &dyn SettingsStore,
    ) -> Self {
        Self::from_config(device, features).with_settings(store).await
    }

    pub fn requires_confirmation(&self, count: usize) -> bool {
        self.always_ask || count >= self.confirmation_threshold
    }

    pub fn is_anomalous(&self, count: u64) -> bool {
        count >= self.anomaly_threshold as u64
    }

    /// Content filter applied to every candidate play.
    pub fn is_eligible(&self, record: &TrackRecord) -> bool {
        if !record.has_required_metadata() {
            return false;
        }
        if record.podcast && !self.podcast_scrobbling {
            return false;
        }
        if record.video {
            return false;
        }
        !record.is_in_folder(&self.excluded_folders)
    }
}

/// Persist the user's "remember my choice" answer.
///
/// Remembering turns always-ask off; not remembering turns it on.
pub async fn remember_choice(store: &dyn SettingsStore, remember_choice: bool) {
    if let Err(e) = store.set_bool(ALWAYS_ASK_KEY, !remember_choice).await {
        warn!(error = %e, "Failed to persist always-ask setting");
    }
}

async fn read_bool(store: &dyn SettingsStore, key: &str) -> Option<bool> {
    match store.get_bool(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, key, "Failed to read setting");
            None
        }
    }
}
