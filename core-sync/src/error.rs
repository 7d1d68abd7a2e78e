use bridge_traits::error::{BridgeError, DeviceAccessError};
use core_cache::CacheError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Device database could not be opened: {0}")]
    Access(String),

    #[error("Unknown device error: {0}")]
    Unknown(String),

    #[error("Device mount path could not be detected: {0}")]
    Autodetection(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("A device session is already in progress for {mount_path}")]
    SessionInProgress { mount_path: String },

    #[error("Device processing cancelled")]
    Cancelled,

    #[error("Playcount cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("{0}")]
    HelperMessage(String),

    #[error("Candidate file {path} could not be processed: {reason}")]
    CandidateFile { path: PathBuf, reason: String },
}

/// How a failure affects the device and the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Worth retrying, possibly after asking the user for input
    Recoverable,
    /// The session ends and the device's baseline is left untouched
    DeviceFatal,
    /// The batch was discarded by the anomaly guard
    BatchAnomalous,
    /// The sync continues with reduced capability
    CapabilityDegraded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Recoverable => "recoverable",
            ErrorKind::DeviceFatal => "device_fatal",
            ErrorKind::BatchAnomalous => "batch_anomalous",
            ErrorKind::CapabilityDegraded => "capability_degraded",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Autodetection(_) | SyncError::Cancelled => ErrorKind::Recoverable,
            _ => ErrorKind::DeviceFatal,
        }
    }

    /// Text shown to the user when a session fails.
    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::Access(_) => "The iPod database could not be opened.",
            _ => "An unknown error occurred while trying to access the iPod database.",
        }
    }
}

impl From<DeviceAccessError> for SyncError {
    fn from(err: DeviceAccessError) -> Self {
        match err {
            DeviceAccessError::MountNotFound(_) => SyncError::Autodetection(err.to_string()),
            DeviceAccessError::Unreadable(_) | DeviceAccessError::UnknownModel(_) => {
                SyncError::Access(err.to_string())
            }
            DeviceAccessError::Other(_) => SyncError::Unknown(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
