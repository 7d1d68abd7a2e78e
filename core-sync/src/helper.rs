//! # Helper Process
//!
//! On hosts where the device library cannot run in-process, a helper binary
//! reads the device and reports back with command-line style messages:
//!
//! ```text
//! --twiddly starting
//! --twiddly no-tracks-found
//! --twiddly complete --ipod-path /path/to/candidates.json
//! --twiddly incompatible-plugin
//! ```
//!
//! `complete` hands the written candidate file to the
//! [`CandidateProcessor`].

use crate::candidates::CandidateProcessor;
use crate::coordinator::EntryOutcome;
use crate::error::{Result, SyncError};
use bridge_traits::{HelperLauncher, HelperProcess};
use core_runtime::events::{CoreEvent, EventBus, HelperEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Message raised when the media-manager plugin is too old.
pub const INCOMPATIBLE_PLUGIN_MESSAGE: &str =
    "Device scrobbling disabled - incompatible iTunes plugin";

/// Argument vector the helper is started with.
pub fn helper_args(manual: bool) -> Vec<String> {
    let mut args: Vec<String> = [
        "--device",
        "background",
        "--vid",
        "0000",
        "--pid",
        "0000",
        "--serial",
        "UNKNOWN",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    if manual {
        args.push("--manual".to_string());
    }
    args
}

/// Result of asking for a helper run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwiddleResult {
    Started,
    /// A previous run is still going; this request was coalesced into it
    AlreadyRunning,
    HostNotRunning,
    PluginNotInstalled,
}

impl TwiddleResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            TwiddleResult::Started => "started",
            TwiddleResult::AlreadyRunning => "already_running",
            TwiddleResult::HostNotRunning => "host_not_running",
            TwiddleResult::PluginNotInstalled => "plugin_not_installed",
        }
    }
}

impl std::fmt::Display for TwiddleResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed helper message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelperMessage {
    Starting,
    NoTracksFound,
    Complete { path: PathBuf },
    IncompatiblePlugin,
}

impl HelperMessage {
    /// Parse a message argument list.
    ///
    /// Returns `None` for anything that is not a helper message.
    /// `complete` is ignored when `no-tracks-found` is also present.
    pub fn parse(args: &[String]) -> Option<Self> {
        let value_of = |flag: &str| {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .map(String::as_str)
        };
        let has = |word: &str| args.iter().any(|a| a == word);

        match value_of("--twiddly")? {
            "starting" => Some(HelperMessage::Starting),
            "no-tracks-found" => Some(HelperMessage::NoTracksFound),
            "incompatible-plugin" => Some(HelperMessage::IncompatiblePlugin),
            "complete" if has("no-tracks-found") => Some(HelperMessage::NoTracksFound),
            "complete" => value_of("--ipod-path").map(|path| HelperMessage::Complete {
                path: PathBuf::from(path),
            }),
            _ => None,
        }
    }
}

/// Starts the helper and reacts to its messages.
pub struct HelperCoordinator {
    launcher: Arc<dyn HelperLauncher>,
    running: Mutex<Option<Box<dyn HelperProcess>>>,
    candidates: Arc<CandidateProcessor>,
    event_bus: EventBus,
}

impl HelperCoordinator {
    pub fn new(
        launcher: Arc<dyn HelperLauncher>,
        candidates: Arc<CandidateProcessor>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            launcher,
            running: Mutex::new(None),
            candidates,
            event_bus,
        }
    }

    fn emit(&self, event: HelperEvent) {
        self.event_bus.emit(CoreEvent::Helper(event)).ok();
    }

    /// Start a helper run unless one is already going.
    #[instrument(skip(self))]
    pub async fn twiddle(&self, manual: bool) -> Result<TwiddleResult> {
        let result = self.try_start(manual).await?;

        match result {
            TwiddleResult::AlreadyRunning => debug!("Helper already running, request coalesced"),
            other => info!(result = %other, "Helper start requested"),
        }
        self.emit(HelperEvent::TwiddleRequested {
            result: result.to_string(),
        });
        Ok(result)
    }

    async fn try_start(&self, manual: bool) -> Result<TwiddleResult> {
        if !self.launcher.is_host_running().await {
            return Ok(TwiddleResult::HostNotRunning);
        }
        if !self.launcher.is_plugin_installed().await {
            return Ok(TwiddleResult::PluginNotInstalled);
        }

        let mut running = self.running.lock().await;
        if let Some(process) = running.as_mut() {
            if !process.has_exited() {
                return Ok(TwiddleResult::AlreadyRunning);
            }
        }

        let process = self.launcher.launch(&helper_args(manual)).await?;
        *running = Some(process);
        Ok(TwiddleResult::Started)
    }

    /// Whether a helper process is currently alive.
    pub async fn is_running(&self) -> bool {
        match self.running.lock().await.as_mut() {
            Some(process) => !process.has_exited(),
            None => false,
        }
    }

    /// React to a helper message.
    ///
    /// Returns `Ok(None)` for messages that need no processing.
    ///
    /// # Errors
    ///
    /// `HelperMessage` when the plugin is incompatible.
    #[instrument(skip(self, args))]
    pub async fn handle_message(&self, args: &[String]) -> Result<Option<EntryOutcome>> {
        let Some(message) = HelperMessage::parse(args) else {
            debug!(?args, "Ignoring unrecognised helper message");
            return Ok(None);
        };

        match message {
            HelperMessage::Starting => {
                self.emit(HelperEvent::Processing);
                Ok(None)
            }
            HelperMessage::NoTracksFound => {
                info!("Helper found no tracks to scrobble");
                self.emit(HelperEvent::NoTracksFound);
                Ok(None)
            }
            HelperMessage::Complete { path } => {
                self.emit(HelperEvent::Completed {
                    path: path.display().to_string(),
                });
                let outcome = self.candidates.process_candidate_files(&[path]).await?;
                Ok(Some(outcome))
            }
            HelperMessage::IncompatiblePlugin => {
                warn!("Helper reported an incompatible plugin");
                self.emit(HelperEvent::IncompatiblePlugin {
                    message: INCOMPATIBLE_PLUGIN_MESSAGE.to_string(),
                });
                Err(SyncError::HelperMessage(
                    INCOMPATIBLE_PLUGIN_MESSAGE.to_string(),
                ))
            }
        }
    }
}
