use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid device identity: {0}")]
    InvalidIdentity(String),

    #[error("Playcount cache is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, CacheError>;
