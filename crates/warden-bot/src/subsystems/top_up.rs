//! Position top-up: add to a position and re-size its stop.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use warden_advisor::Proposal;
use warden_core::{BoxFuture, OrderTag};
use warden_scheduler::{EntryHandler, Outcome, ScheduledEntry, TaskResult};
use warden_sequencer::SequencerError;

use super::{decision_request, ignore_proposal, load_snapshot, sequencer_error, SubsystemContext};

pub const NAME: &str = "top_up";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpPayload {
    pub top_ups: u32,
    /// Last top-up went through but its stop was not re-sized.
    #[serde(default)]
    pub resize_pending: bool,
}

pub struct TopUpHandler {
    ctx: SubsystemContext,
    max_top_ups: u32,
}

impl TopUpHandler {
    pub fn new(ctx: SubsystemContext, max_top_ups: u32) -> Self {
        Self { ctx, max_top_ups }
    }

    async fn run(&self, entry: ScheduledEntry<TopUpPayload>) -> TaskResult<Outcome<TopUpPayload>> {
        let symbol = entry.key.symbol().to_string();
        let mut current = entry.payload.clone();
        if current.resize_pending {
            if let Some(outcome) = self.finish_resize(&entry, &symbol).await? {
                return Ok(outcome);
            }
            current.resize_pending = false;
        } else if entry.payload.top_ups >= self.max_top_ups {
            return Ok(Outcome::complete("top-up limit reached"));
        }
        let Some(snapshot) = load_snapshot(&self.ctx.exchange, &symbol).await? else {
            return Ok(Outcome::complete("position closed"));
        };

        let decision = self
            .ctx
            .advisor
            .decide(decision_request(NAME, &entry, &snapshot))
            .await?;
        debug!(
            subsystem = NAME,
            symbol = %symbol,
            action = decision.proposal.name(),
            confidence = decision.confidence,
            "Advisor decision"
        );

        let unchanged = || {
            if current == entry.payload {
                Outcome::reschedule()
            } else {
                Outcome::reschedule().with_payload(current.clone())
            }
        };
        match decision.proposal {
            Proposal::Skip => Ok(unchanged()),
            Proposal::Abort { reason } => Ok(Outcome::complete(format!("aborted: {reason}"))),
            Proposal::TopUp { ratio } => {
                let result = self
                    .ctx
                    .sequencer
                    .top_up(OrderTag::TopUp, &snapshot.position, &snapshot.orders, ratio)
                    .await;
                let report = match result {
                    Ok(report) => report,
                    Err(SequencerError::BelowMinimum { quantity, min }) => {
                        debug!(subsystem = NAME, symbol = %symbol, %quantity, %min, "Top-up below minimum size");
                        return Ok(unchanged());
                    }
                    Err(e) => return Err(sequencer_error(e)),
                };

                let payload = TopUpPayload {
                    top_ups: current.top_ups + 1,
                    resize_pending: report.is_degraded(),
                };
                info!(
                    subsystem = NAME,
                    symbol = %symbol,
                    ratio = %ratio,
                    top_ups = payload.top_ups,
                    max = self.max_top_ups,
                    "Position topped up"
                );
                if payload.top_ups >= self.max_top_ups {
                    // Unresized stop: the next pass finishes it before completing.
                    if let Some(note) = report.degradation_note() {
                        return Ok(Outcome::reschedule().with_payload(payload).degraded(note));
                    }
                    return Ok(Outcome::complete("top-up limit reached"));
                }
                let outcome = Outcome::reschedule().with_payload(payload);
                Ok(match report.degradation_note() {
                    Some(note) => outcome.degraded(note),
                    None => outcome,
                })
            }
            other => {
                ignore_proposal(NAME, &symbol, other.name());
                Ok(unchanged())
            }
        }
    }

    /// Re-size the stop left behind by an earlier top-up. `None` means the
    /// stop now covers the position and the regular pass may continue.
    async fn finish_resize(
        &self,
        entry: &ScheduledEntry<TopUpPayload>,
        symbol: &str,
    ) -> TaskResult<Option<Outcome<TopUpPayload>>> {
        let Some(snapshot) = load_snapshot(&self.ctx.exchange, symbol).await? else {
            return Ok(Some(Outcome::complete("position closed")));
        };
        let report = self
            .ctx
            .sequencer
            .resize_stop(OrderTag::TopUp, &snapshot.position, &snapshot.orders)
            .await
            .map_err(sequencer_error)?;
        if let Some(note) = report.degradation_note() {
            let outcome = Outcome::reschedule().with_payload(entry.payload.clone());
            return Ok(Some(outcome.degraded(note)));
        }
        info!(subsystem = NAME, symbol = %symbol, "Stop re-sized after earlier top-up");
        if entry.payload.top_ups >= self.max_top_ups {
            return Ok(Some(Outcome::complete("top-up limit reached")));
        }
        Ok(None)
    }
}

impl EntryHandler<TopUpPayload> for TopUpHandler {
    fn handle(
        &self,
        entry: ScheduledEntry<TopUpPayload>,
    ) -> BoxFuture<'_, TaskResult<Outcome<TopUpPayload>>> {
        Box::pin(self.run(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use warden_core::{OrderKind, Size};
    use warden_scheduler::EntryKey;

    use crate::subsystems::testing::{decision, entry_at, long, setup, stop, SYMBOL};

    #[tokio::test]
    async fn test_top_up_then_complete_at_limit() {
        let (mock, advisor, ctx) = setup();
        mock.set_position(long(dec!(1)));
        mock.add_open_order(stop("1", "wdsu-live", dec!(95)));
        advisor.push(SYMBOL, Ok(decision(Proposal::TopUp { ratio: dec!(0.5) })));

        let outcome = TopUpHandler::new(ctx, 1)
            .handle(entry_at(EntryKey::position(SYMBOL), TopUpPayload::default()))
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Complete { .. }));
        assert_eq!(mock.position(SYMBOL).unwrap().size, Size::new(dec!(1.5)));
        assert_eq!(mock.cancelled(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_counter_increments_below_limit() {
        let (mock, advisor, ctx) = setup();
        mock.set_position(long(dec!(1)));
        mock.add_open_order(stop("1", "wdtu-live", dec!(95)));
        advisor.push(SYMBOL, Ok(decision(Proposal::TopUp { ratio: dec!(0.2) })));

        let outcome = TopUpHandler::new(ctx, 3)
            .handle(entry_at(EntryKey::position(SYMBOL), TopUpPayload { top_ups: 1, resize_pending: false }))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            Outcome::Reschedule { payload: Some(TopUpPayload { top_ups: 2, resize_pending: false }), degraded: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_limit_reached_skips_advisor() {
        let (_mock, advisor, ctx) = setup();
        let outcome = TopUpHandler::new(ctx, 2)
            .handle(entry_at(EntryKey::position(SYMBOL), TopUpPayload { top_ups: 2, resize_pending: false }))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Complete { .. }));
        assert!(advisor.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unresized_stop_is_finished_after_limit() {
        let (mock, advisor, ctx) = setup();
        mock.set_position(long(dec!(1)));
        advisor.push(SYMBOL, Ok(decision(Proposal::TopUp { ratio: dec!(0.5) })));
        let handler = TopUpHandler::new(ctx, 1);

        let first = handler
            .handle(entry_at(EntryKey::position(SYMBOL), TopUpPayload::default()))
            .await
            .unwrap();
        let payload = match first {
            Outcome::Reschedule { payload: Some(payload), degraded: Some(_), .. } => payload,
            other => panic!("expected degraded reschedule, got {other:?}"),
        };
        assert_eq!(payload, TopUpPayload { top_ups: 1, resize_pending: true });

        mock.add_open_order(stop("7", "wdtu-old", dec!(95)));
        let second = handler
            .handle(entry_at(EntryKey::position(SYMBOL), payload))
            .await
            .unwrap();

        assert!(matches!(second, Outcome::Complete { .. }));
        let resized: Vec<_> = mock
            .placed()
            .into_iter()
            .filter(|o| o.kind == OrderKind::StopMarket)
            .collect();
        assert_eq!(resized.len(), 1);
        assert_eq!(resized[0].quantity, Size::new(dec!(1.5)));
        assert_eq!(mock.cancelled(), vec!["7".to_string()]);
        assert_eq!(advisor.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_resize_pending_below_limit_clears_on_skip() {
        let (mock, advisor, ctx) = setup();
        mock.set_position(long(dec!(1.5)));
        mock.add_open_order(stop("7", "wdtu-old", dec!(95)));
        advisor.push(SYMBOL, Ok(decision(Proposal::Skip)));

        let outcome = TopUpHandler::new(ctx, 3)
            .handle(entry_at(
                EntryKey::position(SYMBOL),
                TopUpPayload { top_ups: 1, resize_pending: true },
            ))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            Outcome::Reschedule { payload: Some(TopUpPayload { top_ups: 1, resize_pending: false }), degraded: None, .. }
        ));
        assert_eq!(mock.cancelled(), vec!["7".to_string()]);
    }

    #[test]
    fn test_payload_without_resize_flag_deserializes() {
        let payload: TopUpPayload = serde_json::from_str(r#"{"topUps":2}"#).unwrap();
        assert_eq!(payload, TopUpPayload { top_ups: 2, resize_pending: false });
    }
}
