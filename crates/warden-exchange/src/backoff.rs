//! Shared rate-limit budget.
//!
//! The exchange reports the request weight used in the current minute on
//! every response, answers 429 when the budget is exhausted and 418 when
//! the client kept going after a 429. All loops share one coordinator and
//! stop issuing requests until the suspension ends.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use warden_core::Clock;
use warden_telemetry::Metrics;

const MINUTE_MS: u64 = 60_000;

/// Why requests are suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendCause {
    /// Used weight crossed the configured threshold.
    Weight,
    /// HTTP 429.
    TooManyRequests,
    /// HTTP 418 (IP ban).
    Banned,
}

impl SuspendCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weight => "weight",
            Self::TooManyRequests => "429",
            Self::Banned => "418",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Request weight allowed per minute.
    pub weight_limit: u32,
    /// Percentage of `weight_limit` at which polling pauses.
    pub weight_threshold_pct: f64,
    /// Suspension when a 429/418 carries no Retry-After.
    pub default_retry_after_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            weight_limit: 2400,
            weight_threshold_pct: 80.0,
            default_retry_after_ms: 60_000,
        }
    }
}

#[derive(Debug, Default)]
struct BackoffState {
    suspended_until_ms: u64,
    cause: Option<SuspendCause>,
    last_used_weight: u32,
}

pub struct BackoffCoordinator {
    config: BackoffConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BackoffState>,
}

impl BackoffCoordinator {
    pub fn new(config: BackoffConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(BackoffState::default()),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn weight_threshold(&self) -> u32 {
        (f64::from(self.config.weight_limit) * self.config.weight_threshold_pct / 100.0).floor()
            as u32
    }

    /// Record the `X-MBX-USED-WEIGHT-1M` value of a response.
    pub fn observe_used_weight(&self, used_weight: u32) {
        Metrics::used_weight(used_weight);
        self.state.lock().last_used_weight = used_weight;

        let threshold = self.weight_threshold();
        if used_weight >= threshold {
            let now = self.clock.now_ms();
            let next_minute = (now / MINUTE_MS + 1) * MINUTE_MS;
            warn!(
                used_weight,
                threshold,
                resume_in_ms = next_minute - now,
                "Request weight above threshold, suspending until next window"
            );
            self.suspend_until(next_minute, SuspendCause::Weight);
        }
    }

    /// Record a rate-limit status. Other statuses are ignored.
    ///
    /// `ban_until_ms` is the absolute end of an IP ban when the exchange
    /// reported one in the 418 body.
    pub fn observe_status(
        &self,
        status: u16,
        retry_after_ms: Option<u64>,
        ban_until_ms: Option<u64>,
    ) {
        let now = self.clock.now_ms();
        let fallback = now + retry_after_ms.unwrap_or(self.config.default_retry_after_ms);
        match status {
            429 => {
                warn!(retry_after_ms = ?retry_after_ms, "HTTP 429 received, suspending requests");
                self.suspend_until(fallback, SuspendCause::TooManyRequests);
            }
            418 => {
                let until = ban_until_ms.filter(|&t| t > now).unwrap_or(fallback);
                warn!(ban_until_ms = until, "HTTP 418 received, IP banned");
                self.suspend_until(until, SuspendCause::Banned);
            }
            _ => {}
        }
    }

    /// Suspend until `until_ms`. An earlier deadline never shortens an
    /// existing suspension.
    pub fn suspend_until(&self, until_ms: u64, cause: SuspendCause) {
        let mut state = self.state.lock();
        if until_ms > state.suspended_until_ms {
            state.suspended_until_ms = until_ms;
            state.cause = Some(cause);
            Metrics::backoff_suspended(cause.as_str());
        }
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.remaining_ms().is_some()
    }

    /// Time left in the current suspension.
    pub fn remaining_ms(&self) -> Option<u64> {
        let now = self.clock.now_ms();
        let state = self.state.lock();
        (state.suspended_until_ms > now).then(|| state.suspended_until_ms - now)
    }

    pub fn cause(&self) -> Option<SuspendCause> {
        let state = self.state.lock();
        (state.suspended_until_ms > self.clock.now_ms())
            .then_some(state.cause)
            .flatten()
    }

    pub fn last_used_weight(&self) -> u32 {
        self.state.lock().last_used_weight
    }
}
