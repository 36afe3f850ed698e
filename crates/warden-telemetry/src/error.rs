//! Telemetry errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Subscriber already installed or invalid: {0}")]
    Subscriber(String),

    #[error("Failed to encode metrics: {0}")]
    Encode(String),

    #[error("Metrics listener on port {port}: {source}")]
    Listener {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Metrics server stopped with error: {0}")]
    Serve(#[source] std::io::Error),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
