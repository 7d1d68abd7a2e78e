//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the device scrobble engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the cache, sync and service
//! crates depend on. It establishes the logging conventions, the fail-fast
//! configuration builder and the event broadcasting used throughout the
//! system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, DeviceScrobbleConfig, FeatureFlags};
pub use error::{Error, Result};
pub use events::{CoreEvent, DeviceEvent, EventBus, EventSeverity, EventStream, HelperEvent};
