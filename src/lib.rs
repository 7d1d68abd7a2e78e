//! Device scrobble engine.
//!
//! Re-exports [`core_service`] so a host can depend on one crate and pick
//! the desktop bridges (`desktop-shims`) or the out-of-process reader
//! (`helper-process`) through features.

#[cfg(any(feature = "desktop-shims", feature = "helper-process"))]
pub use core_service::*;
