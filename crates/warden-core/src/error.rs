//! Errors raised while building core values from configuration or input.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Jitter window invalid: {0}")]
    InvalidJitter(String),

    #[error("Invalid session cutoff '{0}': expected HH:MM (UTC)")]
    InvalidSessionCutoff(String),

    #[error("Unparseable decimal: {0}")]
    Decimal(#[from] rust_decimal::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
