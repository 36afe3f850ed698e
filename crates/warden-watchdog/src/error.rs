//! Watchdog error types.

use thiserror::Error;
use warden_core::CoreError;
use warden_exchange::ExchangeError;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Invalid watchdog configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

pub type WatchdogResult<T> = Result<T, WatchdogError>;
