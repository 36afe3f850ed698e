//! Exchange error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Exchange API error (status={status}, code={code:?}): {msg}")]
    Api {
        status: u16,
        code: Option<i64>,
        msg: String,
    },

    #[error("Rate limited (status={status}, retry_after_ms={retry_after_ms:?})")]
    RateLimited {
        status: u16,
        retry_after_ms: Option<u64>,
    },

    #[error("Requests suspended for another {remaining_ms}ms")]
    Suspended { remaining_ms: u64 },

    #[error("Order not found: {symbol} {order_id}")]
    OrderNotFound { symbol: String, order_id: String },

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("Signature error: {0}")]
    Signature(String),
}

impl ExchangeError {
    /// HTTP-like status code, when the failure has one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::RateLimited { status, .. } => Some(*status),
            Self::OrderNotFound { .. } | Self::UnknownSymbol(_) => Some(400),
            Self::Timeout(_) => Some(408),
            Self::Suspended { .. } => Some(429),
            _ => None,
        }
    }

    /// Whether retrying on a later cycle can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_)
            | Self::Timeout(_)
            | Self::RateLimited { .. }
            | Self::Suspended { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
