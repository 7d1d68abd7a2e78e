//! # Device Coordinator
//!
//! Serializes device processing: mount events go into a deduplicated FIFO
//! and at most one device session runs at any time.
//!
//! ## Overview
//!
//! A single control task owns the [`DeviceQueue`]. Everything that touches
//! a device (classification, database parse, cache transaction, waiting for
//! confirmation) runs on a worker task spawned per entry, so the control
//! task never blocks on device I/O. Workers report back over the same
//! command channel producers use.
//!
//! ```text
//! Idle ──(queue non-empty)──> Processing(entry) ──(worker finished)──> Idle
//!   └──(queue empty after activity)──> AllDevicesSettled
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::DeviceCoordinator;
//! use bridge_traits::MountEvent;
//!
//! let coordinator = DeviceCoordinator::new(context, policy);
//! coordinator.enqueue(MountEvent::new("/media/IPOD", "000A2700"))?;
//!
//! let status = coordinator.status().await;
//! println!("{} pending", status.pending);
//!
//! coordinator.shutdown().await;
//! ```

use crate::detect::is_supported_device;
use crate::error::{Result, SyncError};
use crate::policy::ScrobblePolicy;
use crate::queue::DeviceQueue;
use crate::session::{DeviceSession, SessionContext, SessionId, SessionOutcome, SessionState};
use bridge_traits::MountEvent;
use core_runtime::events::{CoreEvent, DeviceEvent, EventBus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Reason given when a mount path fails classification.
pub const NOT_A_DEVICE_REASON: &str = "The mount path does not appear to be an iPod.";

/// Reason given when device scrobbling is turned off.
pub const DISABLED_REASON: &str = "Device scrobbling is disabled.";

/// Reason given for entries discarded on shutdown.
pub const SHUTDOWN_REASON: &str = "Shutting down.";

/// What the coordinator is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Processing {
        mount_path: PathBuf,
        /// `None` until the entry passed classification
        session_id: Option<SessionId>,
        state: SessionState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub state: CoordinatorState,
    /// Entries waiting behind the active one
    pub pending: usize,
}

/// Result of processing one queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Removed without a session
    Dropped { reason: String },
    Session(SessionOutcome),
}

enum Command {
    Enqueue(MountEvent),
    Finished {
        mount_path: PathBuf,
        outcome: EntryOutcome,
    },
    Shutdown(oneshot::Sender<()>),
}

struct ActiveDevice {
    mount_path: PathBuf,
    session: Option<(SessionId, watch::Receiver<SessionState>)>,
}

#[derive(Default)]
struct SharedStatus {
    active: Option<ActiveDevice>,
    pending: usize,
}

/// Handle to the device orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct DeviceCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<Mutex<SharedStatus>>,
}

impl DeviceCoordinator {
    /// Spawn the control task. Must be called inside a tokio runtime.
    ///
    /// `policy` holds the configured defaults; each session overlays the
    /// user's current settings on a copy of it.
    pub fn new(context: SessionContext, policy: ScrobblePolicy) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(SharedStatus::default()));

        let control = ControlLoop {
            commands: commands.downgrade(),
            status: Arc::clone(&status),
            context,
            policy,
            queue: DeviceQueue::new(),
            active: None,
            had_activity: false,
            stopping: false,
            shutdown_waiters: Vec::new(),
        };
        tokio::spawn(control.run(receiver));

        Self { commands, status }
    }

    /// Queue a mounted device.
    ///
    /// # Errors
    ///
    /// `Cancelled` once the coordinator has shut down.
    pub fn enqueue(&self, event: MountEvent) -> Result<()> {
        self.commands
            .send(Command::Enqueue(event))
            .map_err(|_| SyncError::Cancelled)
    }

    /// Current activity and queue depth.
    pub async fn status(&self) -> CoordinatorStatus {
        let status = self.status.lock().await;
        let state = match &status.active {
            None => CoordinatorState::Idle,
            Some(active) => CoordinatorState::Processing {
                mount_path: active.mount_path.clone(),
                session_id: active.session.as_ref().map(|(id, _)| *id),
                state: active
                    .session
                    .as_ref()
                    .map(|(_, state)| *state.borrow())
                    .unwrap_or(SessionState::Opening),
            },
        };

        CoordinatorStatus {
            state,
            pending: status.pending,
        }
    }

    /// `false` once the control task has exited.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stop processing.
    ///
    /// Pending entries are discarded. The active session is cancelled; it
    /// still commits what it read before closing. Returns once it has.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_err() {
            debug!("Device coordinator already stopped");
            return;
        }
        done.await.ok();
        info!("Device coordinator stopped");
    }
}

struct ControlLoop {
    /// Weak so the loop ends once every handle and worker is gone
    commands: mpsc::WeakUnboundedSender<Command>,
    status: Arc<Mutex<SharedStatus>>,
    context: SessionContext,
    policy: ScrobblePolicy,
    queue: DeviceQueue,
    /// Cancellation token of the running worker
    active: Option<CancellationToken>,
    had_activity: bool,
    stopping: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl ControlLoop {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Enqueue(event) => self.on_enqueue(event),
                Command::Finished {
                    mount_path,
                    outcome,
                } => {
                    debug!(mount_path = %mount_path.display(), ?outcome, "Queue entry finished");
                    self.active = None;
                    self.status.lock().await.active = None;
                }
                Command::Shutdown(ack) => self.on_shutdown(ack),
            }

            if self.stopping {
                if self.active.is_none() {
                    self.settle();
                    for waiter in self.shutdown_waiters.drain(..) {
                        waiter.send(()).ok();
                    }
                    break;
                }
            } else {
                self.advance().await;
            }

            self.status.lock().await.pending = self.queue.len();
        }

        debug!("Device coordinator control loop exited");
    }

    fn emit(&self, event: DeviceEvent) {
        self.context.event_bus.emit(CoreEvent::Device(event)).ok();
    }

    fn on_enqueue(&mut self, event: MountEvent) {
        let mount_path = event.mount_path.display().to_string();

        if self.stopping {
            self.emit(DeviceEvent::Dropped {
                mount_path,
                reason: SHUTDOWN_REASON.to_string(),
            });
            return;
        }

        if self.queue.push(event) {
            debug!(mount_path = %mount_path, "Device queued");
            self.emit(DeviceEvent::Queued { mount_path });
        } else {
            debug!(mount_path = %mount_path, "Device already queued");
        }
    }

    fn on_shutdown(&mut self, ack: oneshot::Sender<()>) {
        self.stopping = true;
        self.shutdown_waiters.push(ack);

        for event in self.queue.drain() {
            self.emit(DeviceEvent::Dropped {
                mount_path: event.mount_path.display().to_string(),
                reason: SHUTDOWN_REASON.to_string(),
            });
        }

        if let Some(cancel) = &self.active {
            info!("Cancelling active device session");
            cancel.cancel();
        }
    }

    /// Start the next entry if nothing is running.
    async fn advance(&mut self) {
        if self.active.is_some() {
            return;
        }

        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let Some(event) = self.queue.pop() else {
            self.settle();
            return;
        };

        self.had_activity = true;
        let cancel = CancellationToken::new();
        self.active = Some(cancel.clone());
        self.status.lock().await.active = Some(ActiveDevice {
            mount_path: event.mount_path.clone(),
            session: None,
        });

        let worker = Worker {
            commands,
            status: Arc::clone(&self.status),
            context: self.context.clone(),
            policy: self.policy.clone(),
        };
        tokio::spawn(worker.run(event, cancel));
    }

    fn settle(&mut self) {
        if self.had_activity {
            self.had_activity = false;
            info!("All devices settled");
            self.emit(DeviceEvent::AllDevicesSettled);
        }
    }
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<Mutex<SharedStatus>>,
    context: SessionContext,
    policy: ScrobblePolicy,
}

impl Worker {
    #[instrument(skip(self, event, cancel), fields(mount_path = %event.mount_path.display()))]
    async fn run(self, event: MountEvent, cancel: CancellationToken) {
        let mount_path = event.mount_path.clone();
        let outcome = self.process(event, cancel).await;

        if self
            .commands
            .send(Command::Finished {
                mount_path,
                outcome,
            })
            .is_err()
        {
            warn!("Device coordinator stopped before the worker finished");
        }
    }

    async fn process(&self, event: MountEvent, cancel: CancellationToken) -> EntryOutcome {
        if !is_supported_device(&event.mount_path).await {
            info!("Dropping mount path that is not a supported device");
            return self.drop_entry(&event, NOT_A_DEVICE_REASON);
        }

        let policy = self
            .policy
            .clone()
            .with_settings(self.context.settings.as_ref())
            .await;
        if !policy.device_scrobbling_enabled {
            debug!("Device scrobbling disabled, skipping device");
            return self.drop_entry(&event, DISABLED_REASON);
        }

        let session = DeviceSession::new(event, policy, self.context.clone(), cancel);
        if let Some(active) = self.status.lock().await.active.as_mut() {
            active.session = Some((session.id(), session.subscribe_state()));
        }

        EntryOutcome::Session(session.run().await)
    }

    fn drop_entry(&self, event: &MountEvent, reason: &str) -> EntryOutcome {
        self.context
            .event_bus
            .emit(CoreEvent::Device(DeviceEvent::Dropped {
                mount_path: event.mount_path.display().to_string(),
                reason: reason.to_string(),
            }))
            .ok();
        EntryOutcome::Dropped {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{DeviceAccessError, Result as BridgeResult};
    use bridge_traits::{
        AutoApprove, DeviceDatabase, DeviceDatabaseReader, ScrobbleSink, SettingsStore,
        TrackRecord,
    };
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    struct NoDatabase;

    #[async_trait]
    impl DeviceDatabaseReader for NoDatabase {
        async fn open(
            &self,
            mount_path: &Path,
        ) -> std::result::Result<Box<dyn DeviceDatabase>, DeviceAccessError> {
            Err(DeviceAccessError::Unreadable(mount_path.display().to_string()))
        }
    }

    struct NullSink;

    #[async_trait]
    impl ScrobbleSink for NullSink {
        async fn submit(&self, _tracks: Vec<TrackRecord>) -> BridgeResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct EmptySettings(std::sync::Mutex<HashMap<String, String>>);

    #[async_trait]
    impl SettingsStore for EmptySettings {
        async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
            self.0.lock().unwrap().insert(key.into(), value.into());
            Ok(())
        }
        async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }
        async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
            self.set_string(key, &value.to_string()).await
        }
        async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
            Ok(self.get_string(key).await?.map(|v| v == "true"))
        }
        async fn set_i64(&self, key: &str, value: i64) -> BridgeResult<()> {
            self.set_string(key, &value.to_string()).await
        }
        async fn get_i64(&self, key: &str) -> BridgeResult<Option<i64>> {
            Ok(self.get_string(key).await?.and_then(|v| v.parse().ok()))
        }
        async fn delete(&self, key: &str) -> BridgeResult<()> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }
        async fn has_key(&self, key: &str) -> BridgeResult<bool> {
            Ok(self.0.lock().unwrap().contains_key(key))
        }
        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(self.0.lock().unwrap().keys().cloned().collect())
        }
    }

    fn coordinator(dir: &Path, event_bus: EventBus) -> DeviceCoordinator {
        let context = SessionContext {
            reader: Arc::new(NoDatabase),
            confirmation: Arc::new(AutoApprove),
            sink: Arc::new(NullSink),
            settings: Arc::new(EmptySettings::default()),
            event_bus,
            runtime_data_dir: dir.to_path_buf(),
        };
        let policy = ScrobblePolicy::from_config(
            &core_runtime::config::DeviceScrobbleConfig::default(),
            &core_runtime::config::FeatureFlags::default(),
        );
        DeviceCoordinator::new(context, policy)
    }

    async fn next_device_event(
        receiver: &mut tokio::sync::broadcast::Receiver<CoreEvent>,
    ) -> DeviceEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("event in time")
                .expect("bus open");
            if let CoreEvent::Device(event) = event {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_non_device_is_dropped_and_queue_settles() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let coordinator = coordinator(dir.path(), bus);

        let not_ipod = dir.path().join("usbstick");
        std::fs::create_dir_all(&not_ipod).unwrap();
        coordinator.enqueue(MountEvent::manual(&not_ipod)).unwrap();

        assert!(matches!(
            next_device_event(&mut events).await,
            DeviceEvent::Queued { .. }
        ));
        match next_device_event(&mut events).await {
            DeviceEvent::Dropped { reason, .. } => assert_eq!(reason, NOT_A_DEVICE_REASON),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(
            next_device_event(&mut events).await,
            DeviceEvent::AllDevicesSettled
        );

        let status = coordinator.status().await;
        assert_eq!(status.state, CoordinatorState::Idle);
        assert_eq!(status.pending, 0);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), EventBus::new(16));

        coordinator.shutdown().await;
        // The control task exits after acknowledging.
        for _ in 0..50 {
            if !coordinator.is_running() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(!coordinator.is_running());
        assert!(matches!(
            coordinator.enqueue(MountEvent::manual("/media/ipod")),
            Err(SyncError::Cancelled)
        ));
        // A second shutdown is a no-op.
        coordinator.shutdown().await;
    }
}
