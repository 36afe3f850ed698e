//! Snapshot persistence errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Snapshot file access failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot store unavailable: {0}")]
    Unavailable(String),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
