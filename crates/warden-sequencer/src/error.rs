//! Sequencer error types.
//!
//! Every variant records which step failed. Steps before the failing one
//! have already reached the exchange and are not rolled back.

use thiserror::Error;
use warden_core::Size;
use warden_exchange::ExchangeError;

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("position {0} has no size")]
    EmptyPosition(String),

    #[error("position {0} has no usable mark price")]
    MissingMark(String),

    #[error("failed to read symbol info: {0}")]
    SymbolInfo(#[source] ExchangeError),

    /// Nothing was changed on the exchange.
    #[error("stop placement failed: {0}")]
    StopPlacement(#[source] ExchangeError),

    #[error("exit placement failed: {0}")]
    ExitPlacement(#[source] ExchangeError),

    #[error("top-up placement failed: {0}")]
    TopUpPlacement(#[source] ExchangeError),

    #[error("quantity {quantity} below exchange minimum {min}")]
    BelowMinimum { quantity: Size, min: Size },

    #[error("order {0} is not an entry order we own")]
    NotOwned(String),

    /// Old entry still live; nothing was placed.
    #[error("entry cancel failed: {0}")]
    EntryCancel(#[source] ExchangeError),

    /// Old entry is gone and its replacement was not placed.
    #[error("entry {cancelled} cancelled but replacement failed: {source}")]
    EntryPlacement {
        cancelled: String,
        #[source]
        source: ExchangeError,
    },
}

impl SequencerError {
    /// The underlying exchange error, if the failure came from a call.
    pub fn exchange_error(&self) -> Option<&ExchangeError> {
        match self {
            Self::SymbolInfo(e)
            | Self::StopPlacement(e)
            | Self::ExitPlacement(e)
            | Self::TopUpPlacement(e)
            | Self::EntryCancel(e)
            | Self::EntryPlacement { source: e, .. } => Some(e),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.exchange_error().is_some_and(ExchangeError::is_retryable)
    }

    /// Some exchange state changed before the failure.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::EntryPlacement { .. })
    }
}

pub type SequencerResult<T> = Result<T, SequencerError>;
