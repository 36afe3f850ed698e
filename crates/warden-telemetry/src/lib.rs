//! Prometheus metrics and structured logging for the warden.
//!
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - Prometheus collectors for dispatch, sequencing, watchdog and backoff
//! - Optional `/metrics` HTTP endpoint

pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use server::{render_metrics, serve_metrics};
