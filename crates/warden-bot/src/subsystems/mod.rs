//! Subsystem handlers plugged into the generic dispatcher.
//!
//! Every handler follows the same shape: read live exchange state for the
//! entry's symbol, ask the advisor (health scoring excepted), hand the
//! proposal to the sequencer, and turn the result into an [`Outcome`].
//!
//! [`Outcome`]: warden_scheduler::Outcome

pub mod entry;
pub mod health;
pub mod profit;
pub mod strategy;
pub mod top_up;

use std::sync::Arc;

use serde_json::json;
use tracing::warn;
use warden_advisor::{DecisionRequest, DynAdvisor};
use warden_core::{OpenOrder, Position};
use warden_exchange::DynExchange;
use warden_scheduler::{ScheduledEntry, TaskError, TaskResult};
use warden_sequencer::{OrderSequencer, ProtectiveOrderSet, SequencerError};

pub use entry::{EntryPayload, EntryUpdateHandler};
pub use health::{health_score, HealthHandler, HealthPayload};
pub use profit::{ProfitPayload, ProfitTakerHandler};
pub use strategy::{StrategyPayload, StrategyUpdateHandler};
pub use top_up::{TopUpHandler, TopUpPayload};

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct SubsystemContext {
    pub exchange: DynExchange,
    pub advisor: DynAdvisor,
    pub sequencer: Arc<OrderSequencer>,
}

impl SubsystemContext {
    pub fn new(exchange: DynExchange, advisor: DynAdvisor) -> Self {
        Self {
            sequencer: Arc::new(OrderSequencer::new(exchange.clone())),
            exchange,
            advisor,
        }
    }
}

/// Position plus every open order of its symbol.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub position: Position,
    pub orders: Vec<OpenOrder>,
}

impl MarketSnapshot {
    pub fn protection(&self) -> ProtectiveOrderSet {
        ProtectiveOrderSet::from_orders(&self.position, &self.orders)
    }
}

/// Live position for `symbol`, or `None` once it is closed.
///
/// A position reported without a mark price gets one from the mark-price
/// endpoint so the sequencer never compares against zero.
pub async fn load_snapshot(
    exchange: &DynExchange,
    symbol: &str,
) -> TaskResult<Option<MarketSnapshot>> {
    let positions = exchange.list_positions().await?;
    let Some(mut position) = positions
        .into_iter()
        .find(|p| p.symbol == symbol && p.size.is_positive())
    else {
        return Ok(None);
    };
    if !position.mark_price.is_positive() {
        position.mark_price = exchange.get_mark_price(symbol).await?;
    }
    let orders = exchange.list_open_orders(Some(symbol)).await?;
    Ok(Some(MarketSnapshot { position, orders }))
}

/// Advisor request for a position-scoped entry.
pub fn decision_request<P: serde::Serialize>(
    subsystem: &str,
    entry: &ScheduledEntry<P>,
    snapshot: &MarketSnapshot,
) -> DecisionRequest {
    let protection = snapshot.protection();
    let side = snapshot.position.side;
    DecisionRequest {
        subsystem: subsystem.to_string(),
        symbol: snapshot.position.symbol.clone(),
        cycle_index: entry.cycle_index,
        position: snapshot.position.clone(),
        stop_price: protection.stop_price(side),
        target_prices: protection.target_prices(),
        entry_order: None,
        context: json!({
            "checks": entry.checks,
            "sinceMs": entry.since_ms,
            "lastError": entry.last_error,
            "unrealizedPct": snapshot.position.unrealized_pct(),
            "payload": entry.payload,
        }),
    }
}

/// Map a sequencer failure to the dispatcher's error classes.
pub fn sequencer_error(e: SequencerError) -> TaskError {
    if e.is_partial() {
        return TaskError::Partial(e.to_string());
    }
    if e.is_retryable() || matches!(e, SequencerError::MissingMark(_)) {
        return TaskError::Transient(e.to_string());
    }
    TaskError::Fatal(e.to_string())
}

/// Log an advisor proposal this subsystem does not act on.
pub(crate) fn ignore_proposal(subsystem: &str, symbol: &str, proposal: &str) {
    warn!(subsystem, symbol = %symbol, proposal, "Proposal not handled by this subsystem, skipping");
}
