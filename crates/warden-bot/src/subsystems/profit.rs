//! Profit taker: refresh take-profit targets, never the stop.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use warden_advisor::Proposal;
use warden_core::{BoxFuture, OrderTag};
use warden_scheduler::{EntryHandler, Outcome, ScheduledEntry, TaskResult};
use warden_sequencer::ProtectionPlan;

use super::{decision_request, ignore_proposal, load_snapshot, sequencer_error, SubsystemContext};

pub const NAME: &str = "profit_taker";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitPayload {
    /// Cycles that placed new targets.
    pub refreshes: u32,
}

pub struct ProfitTakerHandler {
    ctx: SubsystemContext,
}

impl ProfitTakerHandler {
    pub fn new(ctx: SubsystemContext) -> Self {
        Self { ctx }
    }

    async fn run(&self, entry: ScheduledEntry<ProfitPayload>) -> TaskResult<Outcome<ProfitPayload>> {
        let symbol = entry.key.symbol().to_string();
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

        match decision.proposal {
            Proposal::Skip => Ok(Outcome::reschedule()),
            Proposal::Abort { reason } => {
                info!(subsystem = NAME, symbol = %symbol, reason = %reason, "Advisor aborted profit taking");
                Ok(Outcome::complete(format!("aborted: {reason}")))
            }
            Proposal::Adjust { targets, .. } if targets.is_empty() => {
                debug!(subsystem = NAME, symbol = %symbol, "Adjust without targets, nothing to do");
                Ok(Outcome::reschedule())
            }
            Proposal::Adjust { targets, .. } => {
                let plan = ProtectionPlan {
                    stop_price: None,
                    targets,
                };
                let report = self
                    .ctx
                    .sequencer
                    .protect(OrderTag::ProfitTaker, &snapshot.position, &snapshot.orders, &plan)
                    .await
                    .map_err(sequencer_error)?;

                let mut payload = entry.payload.clone();
                if !report.targets_placed.is_empty() {
                    payload.refreshes += 1;
                    info!(
                        subsystem = NAME,
                        symbol = %symbol,
                        targets = report.targets_placed.len(),
                        refreshes = payload.refreshes,
                        "Targets refreshed"
                    );
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

impl EntryHandler<ProfitPayload> for ProfitTakerHandler {
    fn handle(
        &self,
        entry: ScheduledEntry<ProfitPayload>,
    ) -> BoxFuture<'_, TaskResult<Outcome<ProfitPayload>>> {
        Box::pin(self.run(entry))
    }
}
