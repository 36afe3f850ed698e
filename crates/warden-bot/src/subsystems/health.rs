//! Position health scoring.
//!
//! No advisor call and no exchange action: each cycle recomputes a 0-100
//! score from the live position and its protective orders, publishes it
//! as a gauge and logs it.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::info;
use warden_core::BoxFuture;
use warden_scheduler::{EntryHandler, Outcome, ScheduledEntry, TaskResult};
use warden_sequencer::ProtectiveOrderSet;
use warden_telemetry::Metrics;

use super::{load_snapshot, MarketSnapshot, SubsystemContext};

pub const NAME: &str = "health";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthPayload {
    pub last_score: Option<f64>,
}

/// Score a position.
///
/// Starts at 50; unrealized PnL moves it up to +/-25 (saturating at +/-10%);
/// a live stop adds 20, a missing one subtracts 20; live targets add 5;
/// stop distance beyond the mark costs one point per percent, up to 10.
pub fn health_score(snapshot: &MarketSnapshot) -> f64 {
    let position = &snapshot.position;
    let protection: ProtectiveOrderSet = snapshot.protection();
    let mut score = 50.0;

    let pnl_pct = position
        .unrealized_pct()
        .and_then(|d| d.to_f64())
        .unwrap_or(0.0);
    score += pnl_pct.clamp(-10.0, 10.0) * 2.5;

    match protection.stop_price(position.side) {
        Some(stop) => {
            score += 20.0;
            let distance = stop
                .abs_pct_from(position.mark_price)
                .and_then(|d| d.to_f64())
                .unwrap_or(0.0);
            score -= distance.min(10.0);
        }
        None => score -= 20.0,
    }
    if !protection.targets.is_empty() {
        score += 5.0;
    }

    score.clamp(0.0, 100.0)
}

pub struct HealthHandler {
    ctx: SubsystemContext,
}

impl HealthHandler {
    pub fn new(ctx: SubsystemContext) -> Self {
        Self { ctx }
    }

    async fn run(&self, entry: ScheduledEntry<HealthPayload>) -> TaskResult<Outcome<HealthPayload>> {
        let symbol = entry.key.symbol().to_string();
        let Some(snapshot) = load_snapshot(&self.ctx.exchange, &symbol).await? else {
            Metrics::clear_health_score(&symbol);
            return Ok(Outcome::complete("position closed"));
        };

        let score = health_score(&snapshot);
        Metrics::health_score(&symbol, score);
        info!(
            subsystem = NAME,
            symbol = %symbol,
            score,
            previous = ?entry.payload.last_score,
            "Position health"
        );
        Ok(Outcome::reschedule().with_payload(HealthPayload {
            last_score: Some(score),
        }))
    }
}

impl EntryHandler<HealthPayload> for HealthHandler {
    fn handle(
        &self,
        entry: ScheduledEntry<HealthPayload>,
    ) -> BoxFuture<'_, TaskResult<Outcome<HealthPayload>>> {
        Box::pin(self.run(entry))
    }
}
