//! # Device Session
//!
//! Processes one mounted device from database open to cache commit.
//!
//! ## State Machine
//!
//! ```text
//! Opening → Reading → AwaitingConfirmation → Committing → Closed
//!    ↓         ↓   └──────────────────────────↗    ↓
//!    └──────→ Failed ←─────────────────────────────┘
//! ```
//!
//! `AwaitingConfirmation` is only entered when the policy asks for it, and
//! is the one place the session may wait on a person.
//!
//! ## Baseline
//!
//! The cache normally advances to every counter that was read, including
//! tracks whose plays were filtered, rejected or discarded as anomalous.
//! When plays could not be delivered (shutdown, confirmation port or sink
//! failure) only tracks without pending plays advance, so those plays are
//! found again on the next mount. A failed session leaves the baseline
//! untouched.

use crate::delta::{compute_delta, sort_chronologically, BaselineScope, DeviceDelta};
use crate::detect::{check_write_support, WriteSupport};
use crate::error::{ErrorKind, Result, SyncError};
use crate::policy::{remember_choice, ScrobblePolicy};
use bridge_traits::error::DeviceAccessError;
use bridge_traits::{
    ConfirmationPort, ConfirmationRequest, DeviceDatabase, DeviceDatabaseReader, MountEvent,
    ScrobbleSink, SettingsStore, TrackRecord,
};
use core_cache::{CacheLocation, PlaycountStore, SqlitePlaycountCache};
use core_runtime::events::{CoreEvent, DeviceEvent, EventBus};
use core_runtime::logging::strip_path;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Sysinfo key used as the device id when the mount event carried none.
pub const FIREWIRE_GUID_KEY: &str = "FirewireGuid";

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a session ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::Unknown(format!("Invalid session ID: {}", e)))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// State Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Parsing the device database and opening the cache
    Opening,
    /// Running the delta engine
    Reading,
    /// Waiting for the confirmation port
    AwaitingConfirmation,
    /// Writing the cache baseline and the device database
    Committing,
    /// Handles released
    Closed,
    /// Terminated with an error
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Opening => "opening",
            SessionState::Reading => "reading",
            SessionState::AwaitingConfirmation => "awaiting_confirmation",
            SessionState::Committing => "committing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, to: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, to),
            (Opening, Reading)
                | (Opening, Failed)
                | (Reading, AwaitingConfirmation)
                | (Reading, Committing)
                | (Reading, Failed)
                | (AwaitingConfirmation, Committing)
                | (AwaitingConfirmation, Failed)
                | (Committing, Closed)
                | (Committing, Failed)
        )
    }

    fn validate_transition(&self, to: SessionState) -> Result<()> {
        if self.can_transition_to(to) {
            return Ok(());
        }

        let reason = if self.is_terminal() {
            "Session has already finished"
        } else {
            "Transition is not part of the session lifecycle"
        };

        Err(SyncError::InvalidStateTransition {
            from: self.as_str().to_string(),
            to: to.as_str().to_string(),
            reason: reason.to_string(),
        })
    }
}

impl FromStr for SessionState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "opening" => Ok(SessionState::Opening),
            "reading" => Ok(SessionState::Reading),
            "awaiting_confirmation" => Ok(SessionState::AwaitingConfirmation),
            "committing" => Ok(SessionState::Committing),
            "closed" => Ok(SessionState::Closed),
            "failed" => Ok(SessionState::Failed),
            _ => Err(SyncError::Unknown(format!("Invalid session state: {}", s))),
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Plays were handed to the scrobble sink
    Submitted { count: usize },
    /// Nothing new since the last sync
    NoScrobbles,
    /// The user rejected the batch
    Rejected,
    /// The batch tripped the anomaly guard and was discarded
    Anomalous { count: u64 },
    /// Plays were read but not delivered; they remain pending on the device
    Deferred,
    Failed { kind: ErrorKind, message: String },
}

impl SessionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SessionOutcome::Failed { .. })
    }
}

// ============================================================================
// Session
// ============================================================================

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    pub reader: Arc<dyn DeviceDatabaseReader>,
    pub confirmation: Arc<dyn ConfirmationPort>,
    pub sink: Arc<dyn ScrobbleSink>,
    pub settings: Arc<dyn SettingsStore>,
    pub event_bus: EventBus,
    /// Root of `devices/<family>/<id>/playcounts.db`
    pub runtime_data_dir: PathBuf,
}

/// One device, processed once.
pub struct DeviceSession {
    id: SessionId,
    event: MountEvent,
    policy: ScrobblePolicy,
    context: SessionContext,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

/// What the device told us during `Opening`.
struct OpenedDevice {
    database: Box<dyn DeviceDatabase>,
    cache: SqlitePlaycountCache,
    writable: bool,
}

impl DeviceSession {
    pub fn new(
        event: MountEvent,
        policy: ScrobblePolicy,
        context: SessionContext,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Opening);
        Self {
            id: SessionId::new(),
            event,
            policy,
            context,
            state,
            cancel,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn transition(&self, to: SessionState) -> Result<()> {
        self.state().validate_transition(to)?;
        self.state.send_replace(to);
        debug!(session_id = %self.id, state = %to, "Session state changed");
        Ok(())
    }

    fn emit(&self, event: DeviceEvent) {
        self.context.event_bus.emit(CoreEvent::Device(event)).ok();
    }

    /// Run the session to completion. Never panics and never returns an
    /// error; failures are reported through the outcome and events.
    #[instrument(
        skip(self),
        fields(session_id = %self.id, mount_path = %self.event.mount_path.display())
    )]
    pub async fn run(self) -> SessionOutcome {
        info!("Device session started");
        self.emit(DeviceEvent::SessionStarted {
            session_id: self.id.to_string(),
            mount_path: self.event.mount_path.display().to_string(),
        });

        let outcome = match self.execute().await {
            Ok(outcome) => outcome,
            Err(e) => {
                let kind = e.kind();
                warn!(error = %e, kind = %kind, "Device session failed");
                self.transition(SessionState::Failed).ok();
                self.emit(DeviceEvent::SessionFailed {
                    session_id: self.id.to_string(),
                    kind: kind.as_str().to_string(),
                    message: e.user_message().to_string(),
                });
                SessionOutcome::Failed {
                    kind,
                    message: e.user_message().to_string(),
                }
            }
        };

        self.emit(DeviceEvent::SessionClosed {
            session_id: self.id.to_string(),
        });
        outcome
    }

    async fn execute(&self) -> Result<SessionOutcome> {
        let OpenedDevice {
            mut database,
            cache,
            writable,
        } = self.open().await?;

        let result = self.read_and_commit(&mut database, &cache, writable).await;
        cache.close().await;
        result
    }

    // ------------------------------------------------------------------
    // Opening
    // ------------------------------------------------------------------

    async fn open(&self) -> Result<OpenedDevice> {
        let (database, mount_path) = self.open_database().await?;

        let model = database
            .model()
            .cloned()
            .ok_or_else(|| SyncError::Access("Device model could not be determined".into()))?;
        let family = model.family();
        if family.is_empty() {
            return Err(SyncError::Access(format!(
                "Device model '{}' has no family name",
                model.name
            )));
        }

        let device_id = if self.event.device_id.is_empty() {
            database
                .sysinfo(FIREWIRE_GUID_KEY)
                .filter(|guid| !guid.trim().is_empty())
                .ok_or_else(|| SyncError::Access("Device has no usable identifier".into()))?
        } else {
            self.event.device_id.clone()
        };

        let support = check_write_support(&mount_path, &model.generation).await;
        if let WriteSupport::Missing(file) = &support {
            debug!(
                generation = %model.generation,
                missing_file = file,
                "Device write-back disabled for this session"
            );
            self.emit(DeviceEvent::WriteBackDisabled {
                session_id: self.id.to_string(),
                generation: model.generation.to_string(),
                missing_file: file.to_string(),
            });
        }

        let location =
            CacheLocation::for_device(&self.context.runtime_data_dir, &family, &device_id)
                .map_err(|e| SyncError::Access(e.to_string()))?;
        let cache = SqlitePlaycountCache::open(&location).await?;

        let cache_path = location.path.to_string_lossy();
        debug!(
            model_family = %family,
            cache = strip_path(&cache_path),
            device_id = %device_id,
            writable = support.is_enabled(),
            "Device opened"
        );

        Ok(OpenedDevice {
            database,
            cache,
            writable: support.is_enabled(),
        })
    }

    /// Open the database, asking for the mount path once if it cannot be
    /// found where the mount event said.
    async fn open_database(&self) -> Result<(Box<dyn DeviceDatabase>, PathBuf)> {
        let mount_path = self.event.mount_path.clone();

        match self.context.reader.open(&mount_path).await {
            Ok(database) => Ok((database, mount_path)),
            Err(DeviceAccessError::MountNotFound(path)) => {
                debug!(path = %path.display(), "Device database not found, asking for mount path");

                let manual = self.context.confirmation.request_mount_path().await?;
                let Some(manual) = manual else {
                    return Err(SyncError::Autodetection(format!(
                        "No device database under {} and no mount path was given",
                        path.display()
                    )));
                };

                let database = self.context.reader.open(&manual).await?;
                Ok((database, manual))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------
    // Reading, confirmation, committing
    // ------------------------------------------------------------------

    async fn read_and_commit(
        &self,
        database: &mut Box<dyn DeviceDatabase>,
        cache: &SqlitePlaycountCache,
        writable: bool,
    ) -> Result<SessionOutcome> {
        self.transition(SessionState::Reading)?;
        self.emit(DeviceEvent::CalculatingScrobbles {
            session_id: self.id.to_string(),
        });

        let tracks = database.tracks().to_vec();
        let delta = compute_delta(&tracks, cache, &self.cancel).await?;
        let (outcome, scope) = self.resolve(&delta).await?;

        self.transition(SessionState::Committing)?;
        cache.upsert_all(&delta.baseline(scope)).await?;

        if writable && scope == BaselineScope::All {
            if let Err(e) = database.write_back().await {
                warn!(error = %e, "Device write-back failed");
            }
        }

        match &outcome {
            SessionOutcome::Submitted { count } => {
                info!(count, "Scrobbles submitted");
                self.emit(DeviceEvent::ScrobblesFound {
                    session_id: self.id.to_string(),
                    count: *count as u64,
                });
            }
            SessionOutcome::NoScrobbles => {
                info!("No tracks to scrobble since last sync");
                self.emit(DeviceEvent::NoScrobbles {
                    session_id: self.id.to_string(),
                });
            }
            _ => {}
        }

        self.transition(SessionState::Closed)?;
        Ok(outcome)
    }

    /// Decide what happens to the candidate plays.
    async fn resolve(&self, delta: &DeviceDelta) -> Result<(SessionOutcome, BaselineScope)> {
        if !delta.complete {
            return Ok((SessionOutcome::Deferred, BaselineScope::SettledOnly));
        }

        let eligible = delta.eligible_plays(&self.policy);
        if eligible == 0 {
            return Ok((SessionOutcome::NoScrobbles, BaselineScope::All));
        }

        // Checked before any record is built: a reset counter can report
        // billions of plays.
        if self.policy.is_anomalous(eligible) {
            warn!(count = eligible, "Discarding anomalous scrobble batch");
            self.emit(DeviceEvent::AnomalousBatch {
                session_id: self.id.to_string(),
                count: eligible,
            });
            return Ok((
                SessionOutcome::Anomalous { count: eligible },
                BaselineScope::All,
            ));
        }

        let candidates = delta.candidates(&self.policy);
        let count = candidates.len();

        if !self.policy.requires_confirmation(count) {
            return Ok(self.submit(candidates).await);
        }

        self.transition(SessionState::AwaitingConfirmation)?;
        self.emit(DeviceEvent::AwaitingConfirmation {
            session_id: self.id.to_string(),
            candidates: count as u64,
        });

        let request = ConfirmationRequest { tracks: candidates };
        let response = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("Confirmation abandoned on shutdown");
                return Ok((SessionOutcome::Deferred, BaselineScope::SettledOnly));
            }
            response = self.context.confirmation.confirm(request) => response,
        };

        match response {
            Ok(response) if response.accepted => {
                remember_choice(self.context.settings.as_ref(), response.remember_choice).await;
                let mut tracks = response.tracks;
                sort_chronologically(&mut tracks);
                Ok(self.submit(tracks).await)
            }
            Ok(_) => {
                info!(candidates = count, "Scrobbles rejected");
                Ok((SessionOutcome::Rejected, BaselineScope::All))
            }
            Err(e) => {
                warn!(error = %e, "Confirmation failed");
                Ok((SessionOutcome::Deferred, BaselineScope::SettledOnly))
            }
        }
    }

    async fn submit(&self, tracks: Vec<TrackRecord>) -> (SessionOutcome, BaselineScope) {
        let count = tracks.len();
        if count == 0 {
            return (SessionOutcome::Submitted { count }, BaselineScope::All);
        }

        match self.context.sink.submit(tracks).await {
            Ok(()) => (SessionOutcome::Submitted { count }, BaselineScope::All),
            Err(e) => {
                warn!(error = %e, count, "Scrobble sink rejected batch");
                (SessionOutcome::Deferred, BaselineScope::SettledOnly)
            }
        }
    }
}
