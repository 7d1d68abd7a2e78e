use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// The host did not supply a bridge this operation needs.
    #[error("Capability missing: {capability} ({message})")]
    CapabilityMissing { capability: String, message: String },

    #[error(transparent)]
    Config(#[from] core_runtime::Error),

    #[error(transparent)]
    Sync(#[from] core_sync::SyncError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
