//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the device scrobble engine and
//! the platform it runs on. Each trait represents a capability the engine
//! needs but that is implemented differently per host, plus the small data
//! model those capabilities exchange.
//!
//! ## Traits
//!
//! ### Devices
//! - [`MountWatcher`](device::MountWatcher) - Normalized volume-mount notifications
//! - [`DeviceDatabaseReader`](database::DeviceDatabaseReader) - Opens the on-device track database
//! - [`HelperLauncher`](helper::HelperLauncher) - Out-of-process device reader
//!
//! ### People and Pipelines
//! - [`ConfirmationPort`](confirmation::ConfirmationPort) - Accept/edit/reject candidate plays
//! - [`ScrobbleSink`](confirmation::ScrobbleSink) - Downstream scrobble submission
//!
//! ### Platform Integration
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences storage
//! - [`BackgroundExecutor`](background::BackgroundExecutor) - Timer-driven task scheduling
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is missing:
//!
//! ```ignore
//! use core_runtime::Error;
//!
//! let settings = config.settings_store
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "SettingsStore".to_string(),
//!         message: "Desktop: enable the 'desktop-shims' feature.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! Bridge traits use [`BridgeError`](error::BridgeError). Device database
//! readers use [`DeviceAccessError`](error::DeviceAccessError) so the engine
//! can tell a missing mount from a corrupt database.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so implementations can be
//! shared across tasks behind `Arc`.

pub mod background;
pub mod confirmation;
pub mod database;
pub mod device;
pub mod error;
pub mod helper;
pub mod logging;
pub mod storage;
pub mod time;
pub mod track;

pub use error::{BridgeError, DeviceAccessError};

// Re-export commonly used types
pub use background::{BackgroundExecutor, TaskId, TaskStatus};
pub use confirmation::{
    AutoApprove, ConfirmationPort, ConfirmationRequest, ConfirmationResponse, ScrobbleSink,
};
pub use database::{
    DeviceDatabase, DeviceDatabaseReader, DeviceGeneration, DeviceModel, DeviceTrack, MediaType,
};
pub use device::{MountEvent, MountEventSender, MountWatcher};
pub use helper::{HelperLauncher, HelperProcess};
pub use storage::SettingsStore;
pub use logging::{LogEntry, LogLevel, LoggerSink};
pub use time::{Clock, SystemClock};
pub use track::{TrackRecord, TrackSource};
