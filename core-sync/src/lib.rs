//! # Device Sync Module
//!
//! Turns play counters on removable media players into scrobbles.
//!
//! ## Overview
//!
//! - Mount events are queued and processed one device at a time
//! - Each device is read once per mount; its play counters are compared
//!   against a per-device cache to find the plays since the last sync
//! - Candidate plays are filtered, optionally confirmed by the user and
//!   handed to the scrobble sink in chronological order
//! - The cache baseline advances so the same plays are never reported twice
//!
//! ## Components
//!
//! - **Delta Engine** (`delta`): new-play arithmetic and track normalization
//! - **Scrobble Policy** (`policy`): per-session snapshot of thresholds and toggles
//! - **Device Detection** (`detect`): supported-device and write-back checks
//! - **Device Session** (`session`): per-device state machine
//! - **Device Queue** (`queue`): deduplicated FIFO of mount events
//! - **Device Coordinator** (`coordinator`): single-session orchestrator
//! - **Discovery** (`discovery`): cold start, mount notifications, manual trigger
//! - **Helper Process** (`helper`) and **Candidate Files** (`candidates`):
//!   the out-of-process variant

pub mod candidates;
pub mod coordinator;
pub mod delta;
pub mod detect;
pub mod discovery;
pub mod error;
pub mod helper;
pub mod policy;
pub mod queue;
pub mod session;

pub use candidates::{find_leftover_files, CandidateFile, CandidateProcessor};
pub use coordinator::{CoordinatorState, CoordinatorStatus, DeviceCoordinator, EntryOutcome};
pub use delta::{compute_delta, new_plays, normalize, BaselineScope, DeviceDelta, TrackDelta};
pub use detect::{is_supported_device, write_prerequisite, WriteSupport};
pub use discovery::DeviceDiscovery;
pub use error::{ErrorKind, Result, SyncError};
pub use helper::{helper_args, HelperCoordinator, HelperMessage, TwiddleResult};
pub use policy::ScrobblePolicy;
pub use queue::DeviceQueue;
pub use session::{
    DeviceSession, SessionContext, SessionId, SessionOutcome, SessionState,
};
