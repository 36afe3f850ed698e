//! Advisor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Advisor transport error: {0}")]
    Transport(String),

    #[error("Advisor timed out after {0}ms")]
    Timeout(u64),

    #[error("Advisor returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid advisor response: {0}")]
    Validation(String),
}

impl AdvisorError {
    /// Empty, malformed or out-of-range responses.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type AdvisorResult<T> = Result<T, AdvisorError>;
