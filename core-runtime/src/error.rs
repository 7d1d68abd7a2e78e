use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Capability missing: {capability} ({message})")]
    CapabilityMissing { capability: String, message: String },

    #[error("Default settings store unavailable: {0}")]
    SettingsStore(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
