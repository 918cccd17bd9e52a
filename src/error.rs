use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Lease conflict: {0}")]
    LeaseConflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job store is at capacity")]
    AtCapacity,

    #[error("Unknown tier: {0} (expected primary, overflow, last_resort or buffer)")]
    InvalidTier(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Coordinator returned {status}: {message}")]
    Api { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, FleetError>;
