//! # Core Configuration Module
//!
//! Provides configuration management for the device scrobble engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all necessary dependencies and settings. It enforces
//! fail-fast validation so that missing bridges and inconsistent thresholds
//! are reported before any device is touched.
//!
//! ## Required Dependencies
//!
//! - `runtime_data_dir` - Root for per-device playcount caches and helper files
//! - `SettingsStore` - User-mutable toggles (desktop default: SQLite)
//!
//! ## Optional Dependencies
//!
//! - `BackgroundExecutor` - Required only when background polling is enabled
//!
//! When the `desktop-shims` feature is enabled, a `SqliteSettingsStore` at
//! `<runtime_data_dir>/settings.db` is injected automatically if no store is
//! provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, DeviceScrobbleConfig};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .runtime_data_dir("/home/user/.local/share/scrobbler")
//!     .device_config(
//!         DeviceScrobbleConfig::default().with_poll_interval(Duration::from_secs(180)),
//!     )
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Missing runtime data directory
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - missing runtime data dir");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{BackgroundExecutor, SettingsStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Plays in one sync at which the user is asked to confirm.
pub const DEFAULT_CONFIRMATION_THRESHOLD: usize = 200;

/// Plays in one sync at which the whole batch is treated as corrupt.
pub const DEFAULT_ANOMALY_THRESHOLD: usize = 4000;

/// Helper polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Delay before the first helper poll after startup.
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(3);

/// Core configuration for the device scrobble engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root directory for `devices/<family>/<id>/playcounts.db` and helper
    /// candidate files
    pub runtime_data_dir: PathBuf,

    /// User preferences storage (required)
    pub settings_store: Arc<dyn SettingsStore>,

    /// Background task executor (required for background polling)
    pub background_executor: Option<Arc<dyn BackgroundExecutor>>,

    /// Thresholds and timers
    pub device: DeviceScrobbleConfig,

    /// Feature flags
    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("runtime_data_dir", &self.runtime_data_dir)
            .field("settings_store", &"SettingsStore { ... }")
            .field(
                "background_executor",
                &self
                    .background_executor
                    .as_ref()
                    .map(|_| "BackgroundExecutor { ... }"),
            )
            .field("device", &self.device)
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
///
/// `enable_device_scrobbling`, `enable_podcast_scrobbling` and `always_ask`
/// are defaults; values stored in the `SettingsStore` take precedence at
/// session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Process devices at all
    pub enable_device_scrobbling: bool,

    /// Scrobble podcast episodes
    pub enable_podcast_scrobbling: bool,

    /// Ask for confirmation on every sync
    pub always_ask: bool,

    /// Poll the helper process on a timer (requires BackgroundExecutor)
    pub enable_background_polling: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_device_scrobbling: true,
            enable_podcast_scrobbling: true,
            always_ask: false,
            enable_background_polling: false,
        }
    }
}

/// Thresholds and timers for device processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceScrobbleConfig {
    /// Candidate count at which confirmation is required
    pub confirmation_threshold: usize,

    /// Candidate count at which the batch is discarded
    pub anomaly_threshold: usize,

    /// Interval between helper polls
    pub poll_interval: Duration,

    /// Delay before the first helper poll
    pub startup_delay: Duration,

    /// Folders whose tracks are never scrobbled
    pub excluded_folders: Vec<PathBuf>,
}

impl Default for DeviceScrobbleConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: DEFAULT_CONFIRMATION_THRESHOLD,
            anomaly_threshold: DEFAULT_ANOMALY_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            startup_delay: DEFAULT_STARTUP_DELAY,
            excluded_folders: Vec::new(),
        }
    }
}

impl DeviceScrobbleConfig {
    pub fn with_confirmation_threshold(mut self, threshold: usize) -> Self {
        self.confirmation_threshold = threshold;
        self
    }

    pub fn with_anomaly_threshold(mut self, threshold: usize) -> Self {
        self.anomaly_threshold = threshold;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_excluded_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.excluded_folders.push(folder.into());
        self
    }

    /// Validates thresholds and timers.
    pub fn validate(&self) -> Result<()> {
        if self.confirmation_threshold == 0 {
            return Err(Error::Config(
                "Confirmation threshold must be greater than 0".to_string(),
            ));
        }

        if self.confirmation_threshold > self.anomaly_threshold {
            return Err(Error::Config(format!(
                "Confirmation threshold ({}) cannot exceed anomaly threshold ({})",
                self.confirmation_threshold, self.anomaly_threshold
            )));
        }

        if self.poll_interval < Duration::from_secs(1) {
            return Err(Error::Config(
                "Poll interval must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Runtime data directory is not empty
    /// - Thresholds and poll interval are consistent
    /// - Feature flags are consistent with available bridges
    pub fn validate(&self) -> Result<()> {
        if self.runtime_data_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Runtime data directory cannot be empty".to_string(),
            ));
        }

        self.device.validate()?;

        if self.features.enable_background_polling && self.background_executor.is_none() {
            return Err(Error::Config(
                "Background polling enabled but no BackgroundExecutor provided. \
                 Disable the feature or inject a BackgroundExecutor implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Directory holding per-device caches and helper candidate files.
    pub fn devices_dir(&self) -> PathBuf {
        self.runtime_data_dir.join("devices")
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required for user preferences. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default SqliteSettingsStore. \
                 Other hosts: inject a platform-native settings store."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(runtime_data_dir: &Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    let candidate = runtime_data_dir.join("settings.db");

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Runtime::new().map_err(|e| {
            Error::SettingsStore(format!(
                "Failed to create Tokio runtime for default settings store: {}",
                e
            ))
        })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::SettingsStore(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // A runtime cannot be blocked on from inside another one
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(candidate))
            .join()
            .map_err(|_| {
                Error::SettingsStore(
                    "Worker thread panicked while creating default SettingsStore".to_string(),
                )
            })??,
        Err(_) => init_store(candidate)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_runtime_data_dir: &Path) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    runtime_data_dir: Option<PathBuf>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    background_executor: Option<Arc<dyn BackgroundExecutor>>,
    device: DeviceScrobbleConfig,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the runtime data directory (required).
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .runtime_data_dir("/path/to/data");
    /// ```
    pub fn runtime_data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.runtime_data_dir = Some(path.into());
        self
    }

    /// Sets the settings store implementation.
    ///
    /// Required unless the `desktop-shims` feature provides the default.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Sets the background executor used for helper polling.
    pub fn background_executor(mut self, executor: Arc<dyn BackgroundExecutor>) -> Self {
        self.background_executor = Some(executor);
        self
    }

    /// Replaces the device thresholds and timers.
    pub fn device_config(mut self, device: DeviceScrobbleConfig) -> Self {
        self.device = device;
        self
    }

    /// Enables or disables device scrobbling.
    ///
    /// Default: true
    pub fn enable_device_scrobbling(mut self, enabled: bool) -> Self {
        self.features.enable_device_scrobbling = enabled;
        self
    }

    /// Enables or disables podcast scrobbling.
    ///
    /// Default: true
    pub fn enable_podcast_scrobbling(mut self, enabled: bool) -> Self {
        self.features.enable_podcast_scrobbling = enabled;
        self
    }

    /// Default for "always ask before scrobbling".
    pub fn always_ask(mut self, enabled: bool) -> Self {
        self.features.always_ask = enabled;
        self
    }

    /// Enables or disables background helper polling.
    ///
    /// Requires a `BackgroundExecutor` to be provided.
    pub fn enable_background_polling(mut self, enabled: bool) -> Self {
        self.features.enable_background_polling = enabled;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the runtime data directory is missing or a value
    ///   is invalid
    /// - `Error::CapabilityMissing` if no settings store is available
    pub fn build(self) -> Result<CoreConfig> {
        let runtime_data_dir = self.runtime_data_dir.ok_or_else(|| {
            Error::Config(
                "Runtime data directory is required. Use .runtime_data_dir() to set it."
                    .to_string(),
            )
        })?;

        // Validate cheap fields before touching disk for the default store
        self.device.validate()?;

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&runtime_data_dir)?,
        };

        let config = CoreConfig {
            runtime_data_dir,
            settings_store,
            background_executor: self.background_executor,
            device: self.device,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::background::{TaskId, TaskStatus};
    use bridge_traits::error::Result as BridgeResult;

    struct MockSettingsStore;

    #[async_trait]
    impl SettingsStore for MockSettingsStore {
        async fn set_string(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_string(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }

        async fn set_bool(&self, _key: &str, _value: bool) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_bool(&self, _key: &str) -> BridgeResult<Option<bool>> {
            Ok(None)
        }

        async fn set_i64(&self, _key: &str, _value: i64) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_i64(&self, _key: &str) -> BridgeResult<Option<i64>> {
            Ok(None)
        }

        async fn delete(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }

        async fn has_key(&self, _key: &str) -> BridgeResult<bool> {
            Ok(false)
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct MockExecutor;

    #[async_trait]
    impl BackgroundExecutor for MockExecutor {
        async fn schedule_task(&self, task_id: &str, _interval: Duration) -> BridgeResult<TaskId> {
            Ok(TaskId::new(task_id))
        }

        async fn schedule_once(&self, task_id: &str, _delay: Duration) -> BridgeResult<TaskId> {
            Ok(TaskId::new(task_id))
        }

        async fn cancel_task(&self, _task_id: &TaskId) -> BridgeResult<()> {
            Ok(())
        }

        async fn get_task_status(&self, _task_id: &TaskId) -> BridgeResult<TaskStatus> {
            Ok(TaskStatus::Scheduled)
        }

        async fn list_tasks(&self) -> BridgeResult<Vec<TaskId>> {
            Ok(Vec::new())
        }

        async fn next_execution_time(&self, _task_id: &TaskId) -> BridgeResult<Option<Duration>> {
            Ok(None)
        }
    }

    fn base_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .runtime_data_dir("/tmp/device-scrobble")
            .settings_store(Arc::new(MockSettingsStore))
    }

    #[test]
    fn test_builder_with_required_fields() {
        let config = base_builder().build().unwrap();
        assert_eq!(config.runtime_data_dir, PathBuf::from("/tmp/device-scrobble"));
        assert_eq!(config.devices_dir(), PathBuf::from("/tmp/device-scrobble/devices"));
        assert_eq!(config.device, DeviceScrobbleConfig::default());
        assert_eq!(config.features, FeatureFlags::default());
    }

    #[test]
    fn test_builder_requires_runtime_data_dir() {
        let result = CoreConfig::builder()
            .settings_store(Arc::new(MockSettingsStore))
            .build();
        match result {
            Err(Error::Config(message)) => assert!(message.contains("runtime_data_dir")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_settings_store() {
        let result = CoreConfig::builder().runtime_data_dir("/tmp/x").build();
        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "SettingsStore"
        ));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_default_settings_store() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("data");

        let config = CoreConfig::builder()
            .runtime_data_dir(&dir)
            .build()
            .expect("desktop defaults should succeed");

        let settings = config.settings_store.clone();
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            settings.set_bool("always_ask", true).await.unwrap();
            assert_eq!(settings.get_bool("always_ask").await.unwrap(), Some(true));
        });

        assert!(dir.join("settings.db").exists());
    }

    #[test]
    fn test_feature_flags_default() {
        let flags = FeatureFlags::default();
        assert!(flags.enable_device_scrobbling);
        assert!(flags.enable_podcast_scrobbling);
        assert!(!flags.always_ask);
        assert!(!flags.enable_background_polling);
    }

    #[test]
    fn test_device_config_defaults() {
        let device = DeviceScrobbleConfig::default();
        assert_eq!(device.confirmation_threshold, 200);
        assert_eq!(device.anomaly_threshold, 4000);
        assert_eq!(device.poll_interval, Duration::from_secs(1800));
        assert_eq!(device.startup_delay, Duration::from_secs(3));
        assert!(device.excluded_folders.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_confirmation_threshold() {
        let result = base_builder()
            .device_config(DeviceScrobbleConfig::default().with_confirmation_threshold(0))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_confirmation_above_anomaly() {
        let result = base_builder()
            .device_config(
                DeviceScrobbleConfig::default()
                    .with_confirmation_threshold(500)
                    .with_anomaly_threshold(100),
            )
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_short_poll_interval() {
        let result = base_builder()
            .device_config(
                DeviceScrobbleConfig::default().with_poll_interval(Duration::from_millis(10)),
            )
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_background_polling_requires_executor() {
        let result = base_builder().enable_background_polling(true).build();
        assert!(matches!(result, Err(Error::Config(_))));

        let config = base_builder()
            .enable_background_polling(true)
            .background_executor(Arc::new(MockExecutor))
            .build()
            .unwrap();
        assert!(config.features.enable_background_polling);
    }

    #[test]
    fn test_builder_with_feature_flags() {
        let config = base_builder()
            .enable_podcast_scrobbling(false)
            .always_ask(true)
            .device_config(DeviceScrobbleConfig::default().with_excluded_folder("/music/audiobooks"))
            .build()
            .unwrap();

        assert!(!config.features.enable_podcast_scrobbling);
        assert!(config.features.always_ask);
        assert_eq!(
            config.device.excluded_folders,
            vec![PathBuf::from("/music/audiobooks")]
        );
    }

    #[test]
    fn test_config_debug_hides_bridges() {
        let config = base_builder().build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("SettingsStore { ... }"));
        assert!(rendered.contains("runtime_data_dir"));
    }
}
