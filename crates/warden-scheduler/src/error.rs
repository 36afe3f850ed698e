//! Per-entry task errors.
//!
//! A handler failure never leaves the entry's batch; it is recorded on
//! the entry and the entry is retried after the error backoff.

use thiserror::Error;
use warden_advisor::AdvisorError;
use warden_exchange::ExchangeError;

#[derive(Debug, Error)]
pub enum TaskError {
    /// Transport failure or retryable exchange status.
    #[error("transient: {0}")]
    Transient(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// Advisor response was empty, malformed or out of range.
    #[error("validation: {0}")]
    Validation(String),

    /// Some exchange calls of a sequence succeeded and a later one failed.
    #[error("partial execution: {0}")]
    Partial(String),

    /// Non-retryable failure (rejected order, unknown symbol).
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TaskError {
    /// Metric/log label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Timeout(_) => "timeout",
            Self::Validation(_) => "validation",
            Self::Partial(_) => "partial",
            Self::Fatal(_) => "fatal",
        }
    }
}

impl From<ExchangeError> for TaskError {
    fn from(e: ExchangeError) -> Self {
        if e.is_retryable() {
            Self::Transient(e.to_string())
        } else {
            Self::Fatal(e.to_string())
        }
    }
}

impl From<AdvisorError> for TaskError {
    fn from(e: AdvisorError) -> Self {
        match e {
            AdvisorError::Validation(msg) => Self::Validation(msg),
            AdvisorError::Timeout(ms) => Self::Timeout(ms),
            other => Self::Transient(other.to_string()),
        }
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_classification() {
        let transient: TaskError = ExchangeError::Transport("reset".into()).into();
        assert_eq!(transient.kind(), "transient");
        let fatal: TaskError = ExchangeError::UnknownSymbol("NOPE".into()).into();
        assert_eq!(fatal.kind(), "fatal");
    }

    #[test]
    fn test_advisor_error_classification() {
        let v: TaskError = AdvisorError::Validation("empty".into()).into();
        assert_eq!(v.kind(), "validation");
        let t: TaskError = AdvisorError::Timeout(500).into();
        assert_eq!(t.kind(), "timeout");
    }
}
