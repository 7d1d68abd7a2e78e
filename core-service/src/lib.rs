//! Core service façade and bootstrap helpers.
//!
//! This crate wires a validated [`CoreConfig`] and the host-provided bridges
//! (device database reader, confirmation port, scrobble sink, mount watcher,
//! helper launcher) into a single [`DeviceScrobbleService`]. Desktop apps
//! typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) for the default settings store and background executor.
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .runtime_data_dir(bridge_desktop::default_runtime_data_dir())
//!     .build()?;
//!
//! let service = DeviceScrobbleService::new(config, bridges)?;
//! let mut events = service.subscribe();
//! service.start().await?;
//! ```

pub mod error;
pub mod polling;

pub use error::{CoreError, Result};
pub use polling::{schedule_polling, POLL_TASK_ID, STARTUP_POLL_TASK_ID};

#[cfg(feature = "desktop-shims")]
pub use polling::register_desktop_polling;

#[cfg(feature = "helper-process")]
pub use bridge_desktop::ProcessHelperLauncher;

pub use core_runtime::{CoreConfig, CoreEvent, DeviceEvent, EventBus, HelperEvent};
pub use core_sync::{CoordinatorState, CoordinatorStatus, EntryOutcome, TwiddleResult};

use bridge_traits::{
    BackgroundExecutor, ConfirmationPort, DeviceDatabaseReader, HelperLauncher, MountWatcher,
    ScrobbleSink, TaskId,
};
use core_runtime::events::DEFAULT_EVENT_BUFFER_SIZE;
use core_sync::{
    find_leftover_files, CandidateProcessor, DeviceCoordinator, DeviceDiscovery,
    HelperCoordinator, ScrobblePolicy, SessionContext,
};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Host capabilities the engine needs beyond what [`CoreConfig`] carries.
#[derive(Clone)]
pub struct DeviceBridges {
    pub reader: Arc<dyn DeviceDatabaseReader>,
    pub confirmation: Arc<dyn ConfirmationPort>,
    pub sink: Arc<dyn ScrobbleSink>,
    /// `None` or an invalid watcher means manual discovery only.
    pub mount_watcher: Option<Arc<dyn MountWatcher>>,
    /// Out-of-process device reader, where the host needs one.
    pub helper_launcher: Option<Arc<dyn HelperLauncher>>,
}

impl DeviceBridges {
    pub fn new(
        reader: Arc<dyn DeviceDatabaseReader>,
        confirmation: Arc<dyn ConfirmationPort>,
        sink: Arc<dyn ScrobbleSink>,
    ) -> Self {
        Self {
            reader,
            confirmation,
            sink,
            mount_watcher: None,
            helper_launcher: None,
        }
    }

    pub fn with_mount_watcher(mut self, watcher: Arc<dyn MountWatcher>) -> Self {
        self.mount_watcher = Some(watcher);
        self
    }

    pub fn with_helper_launcher(mut self, launcher: Arc<dyn HelperLauncher>) -> Self {
        self.helper_launcher = Some(launcher);
        self
    }
}

/// Primary façade exposed to host applications.
pub struct DeviceScrobbleService {
    config: CoreConfig,
    event_bus: EventBus,
    coordinator: DeviceCoordinator,
    discovery: DeviceDiscovery,
    candidates: Arc<CandidateProcessor>,
    helper: Option<Arc<HelperCoordinator>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    polling: Mutex<Vec<TaskId>>,
}

impl DeviceScrobbleService {
    /// Wire the engine together.
    ///
    /// Must be called from within a Tokio runtime: the device coordinator
    /// starts its control loop immediately.
    pub fn new(config: CoreConfig, bridges: DeviceBridges) -> Result<Self> {
        Self::with_event_bus(config, bridges, EventBus::new(DEFAULT_EVENT_BUFFER_SIZE))
    }

    pub fn with_event_bus(
        config: CoreConfig,
        bridges: DeviceBridges,
        event_bus: EventBus,
    ) -> Result<Self> {
        config.validate()?;

        let policy = ScrobblePolicy::from_config(&config.device, &config.features);
        let context = SessionContext {
            reader: bridges.reader,
            confirmation: Arc::clone(&bridges.confirmation),
            sink: bridges.sink,
            settings: Arc::clone(&config.settings_store),
            event_bus: event_bus.clone(),
            runtime_data_dir: config.runtime_data_dir.clone(),
        };

        let coordinator = DeviceCoordinator::new(context.clone(), policy.clone());
        let discovery = DeviceDiscovery::new(
            bridges.mount_watcher,
            bridges.confirmation,
            coordinator.clone(),
        );
        let candidates = Arc::new(CandidateProcessor::new(context, policy));
        let helper = bridges.helper_launcher.map(|launcher| {
            Arc::new(HelperCoordinator::new(
                launcher,
                Arc::clone(&candidates),
                event_bus.clone(),
            ))
        });

        info!(
            runtime_data_dir = %config.runtime_data_dir.display(),
            watcher = discovery.has_watcher(),
            helper = helper.is_some(),
            "Device scrobble service created"
        );

        Ok(Self {
            config,
            event_bus,
            coordinator,
            discovery,
            candidates,
            helper,
            forwarder: Mutex::new(None),
            polling: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Cold start.
    ///
    /// With a valid mount watcher: scan what is mounted and follow mount
    /// notifications. Without one: process candidate files left by earlier
    /// helper runs. Background polling is scheduled when enabled.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.discovery.has_watcher() {
            let forwarder = self.discovery.start().await?;
            *self.forwarder.lock().await = forwarder;
        } else {
            self.process_leftovers().await?;
        }

        if self.config.features.enable_background_polling {
            self.start_polling().await?;
        }
        Ok(())
    }

    async fn process_leftovers(&self) -> Result<()> {
        let files = find_leftover_files(&self.config.devices_dir()).await?;
        if files.is_empty() {
            debug!("No leftover candidate files");
            return Ok(());
        }

        info!(files = files.len(), "Processing leftover candidate files");
        let outcome = self.candidates.process_candidate_files(&files).await?;
        debug!(?outcome, "Leftover candidate files processed");
        Ok(())
    }

    async fn start_polling(&self) -> Result<()> {
        let executor = self.background_executor()?;
        let scheduled = schedule_polling(executor.as_ref(), &self.config.device).await;
        self.polling.lock().await.extend(scheduled);
        Ok(())
    }

    fn background_executor(&self) -> Result<Arc<dyn BackgroundExecutor>> {
        self.config
            .background_executor
            .clone()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "BackgroundExecutor".to_string(),
                message: "Background polling requires a BackgroundExecutor".to_string(),
            })
    }

    fn helper(&self) -> Result<&Arc<HelperCoordinator>> {
        self.helper.as_ref().ok_or_else(|| CoreError::CapabilityMissing {
            capability: "HelperLauncher".to_string(),
            message: "This host does not run the device helper process".to_string(),
        })
    }

    /// Manual "scrobble now".
    pub async fn scrobble_now(&self) -> Result<()> {
        self.discovery.scrobble_now().await?;
        Ok(())
    }

    /// Ask the helper process for a run.
    pub async fn twiddle(&self, manual: bool) -> Result<TwiddleResult> {
        Ok(self.helper()?.twiddle(manual).await?)
    }

    /// Forward a message the helper process sent to the application.
    pub async fn handle_helper_message(&self, args: &[String]) -> Result<Option<EntryOutcome>> {
        Ok(self.helper()?.handle_message(args).await?)
    }

    pub async fn status(&self) -> CoordinatorStatus {
        self.coordinator.status().await
    }

    /// Stop polling and discovery, cancel the active session and wait for
    /// it to close.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let tasks: Vec<TaskId> = self.polling.lock().await.drain(..).collect();
        if let Some(executor) = &self.config.background_executor {
            for task in tasks {
                if let Err(e) = executor.cancel_task(&task).await {
                    debug!(task_id = %task.0, error = %e, "Polling task already gone");
                }
            }
        }

        if let Some(forwarder) = self.forwarder.lock().await.take() {
            forwarder.abort();
        }

        self.coordinator.shutdown().await;
        info!("Device scrobble service stopped");
    }
}

impl Drop for DeviceScrobbleService {
    fn drop(&mut self) {
        if let Ok(mut forwarder) = self.forwarder.try_lock() {
            if let Some(handle) = forwarder.take() {
                warn!("Device scrobble service dropped without shutdown");
                handle.abort();
            }
        }
    }
}
