//! Strategy update: trail the stop and reset targets on advisor proposals.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use warden_advisor::Proposal;
use warden_core::{BoxFuture, OrderTag};
use warden_scheduler::{EntryHandler, Outcome, ScheduledEntry, TaskResult};
use warden_sequencer::ProtectionPlan;

use super::{decision_request, ignore_proposal, load_snapshot, sequencer_error, SubsystemContext};

pub const NAME: &str = "strategy_update";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyPayload {
    /// Cycles that changed at least one order.
    pub adjustments: u32,
}

pub struct StrategyUpdateHandler {
    ctx: SubsystemContext,
}

impl StrategyUpdateHandler {
    pub fn new(ctx: SubsystemContext) -> Self {
        Self { ctx }
    }

    async fn run(&self, entry: ScheduledEntry<StrategyPayload>) -> TaskResult<Outcome<StrategyPayload>> {
        let symbol = entry.key.symbol().to_string();
        let Some(snapshot) = load_snapshot(&self.ctx.exchange, &symbol).await? else {
            return Ok(Outcome::complete("position closed"));
        };

        let request = decision_request(NAME, &entry, &snapshot);
        let decision = self.ctx.advisor.decide(request).await?;
        debug!(
            subsystem = NAME,
            symbol = %symbol,
            action = decision.proposal.name(),
            confidence = decision.confidence,
            rationale = %decision.rationale,
            "Advisor decision"
        );

        match decision.proposal {
            Proposal::Skip => Ok(Outcome::reschedule()),
            Proposal::Abort { reason } => {
                info!(subsystem = NAME, symbol = %symbol, reason = %reason, "Advisor aborted management");
                Ok(Outcome::complete(format!("aborted: {reason}")))
            }
            Proposal::Adjust {
                stop_price,
                targets,
                ..
            } => {
                let plan = ProtectionPlan {
                    stop_price,
                    targets,
                };
                let report = self
                    .ctx
                    .sequencer
                    .protect(
                        OrderTag::StrategyUpdate,
                        &snapshot.position,
                        &snapshot.orders,
                        &plan,
                    )
                    .await
                    .map_err(sequencer_error)?;

                if let Some(order_id) = report.exited {
                    return Ok(Outcome::complete(format!("exited at market ({order_id})")));
                }

                let mut payload = entry.payload.clone();
                if report.changed_anything() {
                    payload.adjustments += 1;
                }
                let outcome = Outcome::reschedule().with_payload(payload);
                Ok(match report.degradation_note() {
                    Some(note) => outcome.degraded(note),
                    None => outcome,
                })
            }
            other => {
                ignore_proposal(NAME, &symbol, other.name());
                Ok(Outcome::reschedule())
            }
        }
    }
}

impl EntryHandler<StrategyPayload> for StrategyUpdateHandler {
    fn handle(
        &self,
        entry: ScheduledEntry<StrategyPayload>,
    ) -> BoxFuture<'_, TaskResult<Outcome<StrategyPayload>>> {
        Box::pin(self.run(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use warden_advisor::{AdvisorError, TargetLevel};
    use warden_core::{OrderKind, Price};
    use warden_scheduler::{EntryKey, TaskError};

    use crate::subsystems::testing::{decision, entry_at, long, setup, stop, SYMBOL};

    fn entry() -> ScheduledEntry<StrategyPayload> {
        entry_at(EntryKey::position(SYMBOL), StrategyPayload::default())
    }

    #[tokio::test]
    async fn test_adjust_trails_stop() {
        let (mock, advisor, ctx) = setup();
        mock.set_position(long(dec!(1)));
        mock.add_open_order(stop("1", "wdsu-old", dec!(95)));
        advisor.push(
            SYMBOL,
            Ok(decision(Proposal::Adjust {
                stop_price: Some(Price::new(dec!(97))),
                targets: vec![TargetLevel {
                    price: Price::new(dec!(110)),
                    fraction: dec!(1),
                }],
                entry_price: None,
            })),
        );

        let outcome = StrategyUpdateHandler::new(ctx).handle(entry()).await.unwrap();

        match outcome {
            Outcome::Reschedule {
                payload, degraded, ..
            } => {
                assert_eq!(payload, Some(StrategyPayload { adjustments: 1 }));
                assert!(degraded.is_none());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let placed = mock.placed();
        assert_eq!(placed[0].kind, OrderKind::StopMarket);
        assert_eq!(placed[1].kind, OrderKind::Limit);
        assert_eq!(mock.cancelled(), vec!["1".to_string()]);

        let request = &advisor.requests()[0];
        assert_eq!(request.stop_price, Some(Price::new(dec!(95))));
        assert_eq!(request.subsystem, NAME);
    }

    #[tokio::test]
    async fn test_closed_position_completes() {
        let (_mock, advisor, ctx) = setup();
        let outcome = StrategyUpdateHandler::new(ctx).handle(entry()).await.unwrap();
        assert!(matches!(outcome, Outcome::Complete { .. }));
        assert!(advisor.requests().is_empty());
    }

    #[tokio::test]
    async fn test_abort_completes() {
        let (mock, advisor, ctx) = setup();
        mock.set_position(long(dec!(1)));
        advisor.push(
            SYMBOL,
            Ok(decision(Proposal::Abort {
                reason: "thesis invalid".to_string(),
            })),
        );
        let outcome = StrategyUpdateHandler::new(ctx).handle(entry()).await.unwrap();
        assert!(matches!(outcome, Outcome::Complete { ref reason } if reason.contains("thesis")));
        assert!(mock.placed().is_empty());
    }

    #[tokio::test]
    async fn test_validation_error_surfaces() {
        let (mock, advisor, ctx) = setup();
        mock.set_position(long(dec!(1)));
        advisor.push(SYMBOL, Err(AdvisorError::Validation("empty response".to_string())));
        let err = StrategyUpdateHandler::new(ctx).handle(entry()).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn test_stop_through_mark_completes_after_exit() {
        let (mock, advisor, ctx) = setup();
        mock.set_position(long(dec!(1)));
        advisor.push(
            SYMBOL,
            Ok(decision(Proposal::Adjust {
                stop_price: Some(Price::new(dec!(100.5))),
                targets: Vec::new(),
                entry_price: None,
            })),
        );
        let outcome = StrategyUpdateHandler::new(ctx).handle(entry()).await.unwrap();
        assert!(matches!(outcome, Outcome::Complete { .. }));
        assert!(mock.position(SYMBOL).is_none());
    }
}
