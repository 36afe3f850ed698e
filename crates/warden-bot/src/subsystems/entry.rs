//! Entry update: reprice resting entry orders.
//!
//! Entries are order-scoped (`SYMBOL:ORDER_ID`). A reposition replaces the
//! order, so the old key completes and the new order id is scheduled with
//! the carried-over payload.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use warden_advisor::{DecisionRequest, Proposal};
use warden_core::{BoxFuture, OpenOrder, OrderTag, Position, PositionSide, Size};
use warden_scheduler::{
    DispatcherConfig, EntryHandler, EntryKey, Outcome, Registry, ScheduledEntry, TaskError,
    TaskResult,
};
use warden_sequencer::RepositionReport;

use super::{ignore_proposal, sequencer_error, SubsystemContext};

pub const NAME: &str = "entry_update";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPayload {
    pub repositions: u32,
}

pub struct EntryUpdateHandler {
    ctx: SubsystemContext,
    registry: Arc<Registry<EntryPayload>>,
    dispatch: DispatcherConfig,
}

impl EntryUpdateHandler {
    pub fn new(
        ctx: SubsystemContext,
        registry: Arc<Registry<EntryPayload>>,
        dispatch: DispatcherConfig,
    ) -> Self {
        Self {
            ctx,
            registry,
            dispatch,
        }
    }

    async fn run(&self, entry: ScheduledEntry<EntryPayload>) -> TaskResult<Outcome<EntryPayload>> {
        let symbol = entry.key.symbol().to_string();
        let Some(order_id) = entry.key.order_id().map(str::to_string) else {
            return Err(TaskError::Fatal(format!("{} is not an order key", entry.key)));
        };

        let orders = self.ctx.exchange.list_open_orders(Some(&symbol)).await?;
        let Some(order) = orders.iter().find(|o| o.order_id == order_id).cloned() else {
            return Ok(Outcome::complete("order no longer open"));
        };
        if !order.is_entry() || !order.owner().is_tag(OrderTag::EntryUpdate) {
            return Ok(Outcome::complete("not a managed entry order"));
        }

        let request = self.request(&entry, &order).await?;
        let decision = self.ctx.advisor.decide(request).await?;
        debug!(
            subsystem = NAME,
            key = %entry.key,
            action = decision.proposal.name(),
            confidence = decision.confidence,
            "Advisor decision"
        );

        match decision.proposal {
            Proposal::Skip => Ok(Outcome::reschedule()),
            Proposal::Abort { reason } => Ok(Outcome::complete(format!("aborted: {reason}"))),
            Proposal::Adjust {
                entry_price: Some(price),
                ..
            } => {
                let report = self
                    .ctx
                    .sequencer
                    .reposition_entry(&order, price, &orders)
                    .await
                    .map_err(sequencer_error)?;
                match report {
                    RepositionReport::Unchanged { .. } => Ok(Outcome::reschedule()),
                    RepositionReport::Moved {
                        cancelled_order_id,
                        new_order_id,
                        price,
                    } => {
                        let payload = EntryPayload {
                            repositions: entry.payload.repositions + 1,
                        };
                        let new_key = EntryKey::order(&symbol, &new_order_id);
                        let delay = self.dispatch.next_delay(self.dispatch.interval_ms);
                        if !self.registry.schedule(new_key.clone(), payload, delay) {
                            warn!(subsystem = NAME, key = %new_key, "Replacement order already tracked");
                        }
                        info!(
                            subsystem = NAME,
                            symbol = %symbol,
                            old_order_id = %cancelled_order_id,
                            new_order_id = %new_order_id,
                            price = %price,
                            "Entry order moved"
                        );
                        Ok(Outcome::complete(format!("replaced by {new_order_id}")))
                    }
                }
            }
            other => {
                ignore_proposal(NAME, &symbol, other.name());
                Ok(Outcome::reschedule())
            }
        }
    }

    async fn request(
        &self,
        entry: &ScheduledEntry<EntryPayload>,
        order: &OpenOrder,
    ) -> TaskResult<DecisionRequest> {
        let positions = self.ctx.exchange.list_positions().await?;
        let position = match positions.into_iter().find(|p| p.symbol == order.symbol) {
            Some(p) if p.mark_price.is_positive() => p,
            existing => {
                let mark = self.ctx.exchange.get_mark_price(&order.symbol).await?;
                existing.map_or_else(|| flat_position(order, mark), |p| Position { mark_price: mark, ..p })
            }
        };
        let now_ms = self.registry.now_ms();
        Ok(DecisionRequest {
            subsystem: NAME.to_string(),
            symbol: order.symbol.clone(),
            cycle_index: entry.cycle_index,
            position,
            stop_price: None,
            target_prices: Vec::new(),
            entry_order: Some(order.clone()),
            context: json!({
                "checks": entry.checks,
                "orderAgeMinutes": order.age_minutes(now_ms),
                "lastError": entry.last_error,
                "payload": entry.payload,
            }),
        })
    }
}

/// Zero-size position carrying the mark, for entries with no position yet.
fn flat_position(order: &OpenOrder, mark: warden_core::Price) -> Position {
    let side = match order.side {
        warden_core::OrderSide::Buy => PositionSide::Long,
        warden_core::OrderSide::Sell => PositionSide::Short,
    };
    Position {
        symbol: order.symbol.clone(),
        side,
        size: Size::ZERO,
        entry_price: order.effective_price().unwrap_or(mark),
        mark_price: mark,
        unrealized_pnl: Decimal::ZERO,
        updated_at_ms: 0,
    }
}

impl EntryHandler<EntryPayload> for EntryUpdateHandler {
    fn handle(
        &self,
        entry: ScheduledEntry<EntryPayload>,
    ) -> BoxFuture<'_, TaskResult<Outcome<EntryPayload>>> {
        Box::pin(self.run(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use warden_core::{Clock, JitterWindow, ManualClock, OrderKind, OrderSide, Price};
    use warden_exchange::MockOp;
    use warden_persistence::MemoryStore;
    use warden_scheduler::EntryStatus;

    use crate::subsystems::testing::{decision, entry_at, setup, SYMBOL};

    fn dispatch() -> DispatcherConfig {
        DispatcherConfig {
            poll_interval_ms: 1_000,
            max_concurrent_decisions: 1,
            interval_ms: 60_000,
            cooldown_floor_ms: 1_000,
            error_backoff_ms: 5_000,
            task_timeout_ms: 5_000,
            jitter: JitterWindow::none(),
        }
    }

    fn registry() -> Arc<Registry<EntryPayload>> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
        Arc::new(Registry::new(NAME, Arc::new(MemoryStore::new()), clock, u64::MAX))
    }

    fn resting_entry(client: &str) -> OpenOrder {
        OpenOrder {
            symbol: SYMBOL.to_string(),
            order_id: "8".to_string(),
            client_order_id: client.to_string(),
            side: OrderSide::Buy,
            kind: OrderKind::Limit,
            price: Some(Price::new(dec!(99))),
            stop_price: None,
            quantity: Size::new(dec!(1)),
            reduce_only: false,
            created_at_ms: 0,
        }
    }

    fn reprice(price: Decimal) -> Proposal {
        Proposal::Adjust {
            stop_price: None,
            targets: Vec::new(),
            entry_price: Some(Price::new(price)),
        }
    }

    #[tokio::test]
    async fn test_reposition_moves_key_to_new_order() {
        let (mock, advisor, ctx) = setup();
        mock.add_open_order(resting_entry("wden-abc"));
        advisor.push(SYMBOL, Ok(decision(reprice(dec!(98)))));
        let reg = registry();
        let handler = EntryUpdateHandler::new(ctx, reg.clone(), dispatch());

        let outcome = handler
            .handle(entry_at(EntryKey::order(SYMBOL, "8"), EntryPayload::default()))
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Complete { .. }));
        assert_eq!(mock.cancelled(), vec!["8".to_string()]);
        let placed = mock.placed();
        assert_eq!(placed.len(), 1);
        let new_order = mock
            .open_orders()
            .into_iter()
            .find(|o| o.client_order_id == placed[0].client_order_id.as_str())
            .unwrap();
        let tracked = reg.get(&EntryKey::order(SYMBOL, &new_order.order_id)).unwrap();
        assert_eq!(tracked.status, EntryStatus::Waiting);
        assert_eq!(tracked.payload.repositions, 1);

        let request = &advisor.requests()[0];
        assert!(request.entry_order.is_some());
        assert!(request.position.size.is_zero());
        assert_eq!(request.position.mark_price, Price::new(dec!(100)));
    }

    #[tokio::test]
    async fn test_vanished_order_completes() {
        let (_mock, advisor, ctx) = setup();
        let handler = EntryUpdateHandler::new(ctx, registry(), dispatch());
        let outcome = handler
            .handle(entry_at(EntryKey::order(SYMBOL, "8"), EntryPayload::default()))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Complete { .. }));
        assert!(advisor.requests().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_entry_is_not_managed() {
        let (mock, advisor, ctx) = setup();
        mock.add_open_order(resting_entry("web_manual"));
        let handler = EntryUpdateHandler::new(ctx, registry(), dispatch());
        let outcome = handler
            .handle(entry_at(EntryKey::order(SYMBOL, "8"), EntryPayload::default()))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Complete { .. }));
        assert!(advisor.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_failure_places_nothing() {
        let (mock, advisor, ctx) = setup();
        mock.add_open_order(resting_entry("wden-abc"));
        mock.fail_always(MockOp::CancelOrder, 503);
        advisor.push(SYMBOL, Ok(decision(reprice(dec!(98)))));
        let handler = EntryUpdateHandler::new(ctx, registry(), dispatch());

        let err = handler
            .handle(entry_at(EntryKey::order(SYMBOL, "8"), EntryPayload::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Transient(_)));
        assert!(mock.placed().is_empty());
    }
}
