use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure reported by a [`DeviceDatabaseReader`](crate::database::DeviceDatabaseReader)
/// or by a device database write-back.
#[derive(Error, Debug)]
pub enum DeviceAccessError {
    /// Nothing that looks like a device database exists under the path.
    #[error("No device database found under {0}")]
    MountNotFound(PathBuf),

    /// The on-device database exists but could not be parsed.
    #[error("Device database unreadable: {0}")]
    Unreadable(String),

    /// The database parsed but the hardware model is unknown or invalid.
    #[error("Unknown device model: {0}")]
    UnknownModel(String),

    #[error("Device access failed: {0}")]
    Other(String),
}
