//! HTTP decision adapter.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use warden_core::BoxFuture;

use crate::adapter::DecisionAdapter;
use crate::error::{AdvisorError, AdvisorResult};
use crate::types::{Decision, DecisionRequest};

#[derive(Debug, Clone, Deserialize)]
pub struct HttpAdvisorConfig {
    /// Endpoint receiving `POST {url}/{subsystem}`.
    pub url: String,
    pub timeout_ms: u64,
    /// Decisions below this confidence become `skip`.
    pub min_confidence: f64,
}

pub struct HttpDecisionAdapter {
    client: Client,
    config: HttpAdvisorConfig,
}

impl HttpDecisionAdapter {
    pub fn new(config: HttpAdvisorConfig) -> AdvisorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AdvisorError::Transport(format!("Failed to create HTTP client: {e}")))?;
        info!(url = %config.url, min_confidence = config.min_confidence, "Advisor client created");
        Ok(Self { client, config })
    }

    fn endpoint(&self, subsystem: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), subsystem)
    }

    async fn request(&self, request: DecisionRequest) -> AdvisorResult<Decision> {
        let url = self.endpoint(&request.subsystem);
        let symbol = request.symbol.clone();

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdvisorError::Timeout(self.config.timeout_ms)
                } else {
                    AdvisorError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdvisorError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(AdvisorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let decision = Decision::parse(&body).map_err(|e| {
            warn!(symbol = %symbol, error = %e, "Advisor response rejected");
            e
        })?;
        debug!(
            symbol = %symbol,
            action = decision.proposal.name(),
            confidence = decision.confidence,
            "Advisor decision received"
        );
        Ok(decision.gate_confidence(self.config.min_confidence))
    }
}

impl DecisionAdapter for HttpDecisionAdapter {
    fn decide(&self, request: DecisionRequest) -> BoxFuture<'_, AdvisorResult<Decision>> {
        Box::pin(self.request(request))
    }
}
