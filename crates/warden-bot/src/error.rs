//! Application error types.

use thiserror::Error;

/// Start-up failures. Runtime errors inside the loops are logged, not returned.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] warden_core::CoreError),

    #[error("Exchange client: {0}")]
    Exchange(#[from] warden_exchange::ExchangeError),

    #[error("Advisor client: {0}")]
    Advisor(#[from] warden_advisor::AdvisorError),

    #[error("Watchdog rules: {0}")]
    Watchdog(#[from] warden_watchdog::WatchdogError),

    #[error("Data directory: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
