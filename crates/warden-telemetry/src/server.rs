//! `/metrics` endpoint using axum.

use std::net::SocketAddr;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{TelemetryError, TelemetryResult};

/// Render the default registry in the Prometheus text format.
pub fn render_metrics() -> TelemetryResult<String> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buf)
        .map_err(|e| TelemetryError::Encode(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| TelemetryError::Encode(e.to_string()))
}

async fn metrics_handler() -> Response {
    match render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
}

/// Serve metrics until `shutdown` is cancelled.
pub async fn serve_metrics(port: u16, shutdown: CancellationToken) -> TelemetryResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| TelemetryError::Listener { port, source })?;
    info!(port, "Starting metrics server");

    axum::serve(listener, create_router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(TelemetryError::Serve)?;

    info!("Metrics server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metrics;

    #[test]
    fn test_render_includes_registered_metrics() {
        Metrics::backoff_suspended("429");
        let body = render_metrics().unwrap();
        assert!(body.contains("warden_backoff_suspensions_total"));
    }
}
