//! Decision request and response types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use warden_core::{OpenOrder, Position, Price};

use crate::error::{AdvisorError, AdvisorResult};

/// What the advisor is asked about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    /// Subsystem asking, e.g. `strategy_update`.
    pub subsystem: String,
    pub symbol: String,
    /// Number of completed cycles for this entry.
    pub cycle_index: u64,
    pub position: Position,
    /// Most protective live stop.
    pub stop_price: Option<Price>,
    pub target_prices: Vec<Price>,
    /// Entry order under review (order-scoped subsystems only).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entry_order: Option<OpenOrder>,
    /// Opaque subsystem context forwarded as-is.
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Take-profit level: price and share of the position it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLevel {
    pub price: Price,
    /// Fraction of the position, in (0, 1].
    pub fraction: Decimal,
}

/// Proposed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Proposal {
    /// Keep everything as it is.
    Skip,
    Adjust {
        #[serde(default, rename = "stopPrice")]
        stop_price: Option<Price>,
        #[serde(default)]
        targets: Vec<TargetLevel>,
        /// New price for an entry order (entry_update only).
        #[serde(default, rename = "entryPrice")]
        entry_price: Option<Price>,
    },
    TopUp {
        /// Add-on size as a fraction of the current position.
        ratio: Decimal,
    },
    /// Stop managing this entry.
    Abort {
        #[serde(default)]
        reason: String,
    },
}

impl Proposal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Adjust { .. } => "adjust",
            Self::TopUp { .. } => "topUp",
            Self::Abort { .. } => "abort",
        }
    }

    fn validate(&self) -> AdvisorResult<()> {
        match self {
            Self::Skip | Self::Abort { .. } => Ok(()),
            Self::Adjust {
                stop_price,
                targets,
                entry_price,
            } => {
                if stop_price.is_none() && targets.is_empty() && entry_price.is_none() {
                    return Err(AdvisorError::Validation(
                        "adjust carries no stop, target or entry price".to_string(),
                    ));
                }
                for (name, price) in [("stopPrice", stop_price), ("entryPrice", entry_price)] {
                    if let Some(p) = price {
                        if !p.is_positive() {
                            return Err(AdvisorError::Validation(format!("{name} {p} not positive")));
                        }
                    }
                }
                let mut total = Decimal::ZERO;
                for t in targets {
                    if !t.price.is_positive() {
                        return Err(AdvisorError::Validation(format!(
                            "target price {} not positive",
                            t.price
                        )));
                    }
                    if t.fraction <= Decimal::ZERO || t.fraction > Decimal::ONE {
                        return Err(AdvisorError::Validation(format!(
                            "target fraction {} outside (0, 1]",
                            t.fraction
                        )));
                    }
                    total += t.fraction;
                }
                if total > Decimal::ONE {
                    return Err(AdvisorError::Validation(format!(
                        "target fractions sum to {total}"
                    )));
                }
                Ok(())
            }
            Self::TopUp { ratio } => {
                if *ratio <= Decimal::ZERO || *ratio > Decimal::ONE {
                    return Err(AdvisorError::Validation(format!(
                        "topUp ratio {ratio} outside (0, 1]"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Advisor response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(flatten)]
    pub proposal: Proposal,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

impl Decision {
    pub fn skip(rationale: impl Into<String>) -> Self {
        Self {
            proposal: Proposal::Skip,
            confidence: 1.0,
            rationale: rationale.into(),
        }
    }

    /// Reject out-of-range confidence and malformed proposals.
    pub fn validate(&self) -> AdvisorResult<()> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(AdvisorError::Validation(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        self.proposal.validate()
    }

    /// Replace the proposal with `skip` when confidence is below `min`.
    #[must_use]
    pub fn gate_confidence(self, min: f64) -> Self {
        if self.confidence >= min || matches!(self.proposal, Proposal::Skip) {
            return self;
        }
        Self {
            proposal: Proposal::Skip,
            rationale: format!(
                "downgraded {} (confidence {:.2} < {:.2}): {}",
                self.proposal.name(),
                self.confidence,
                min,
                self.rationale
            ),
            confidence: self.confidence,
        }
    }

    /// Parse and validate a raw response body.
    pub fn parse(body: &str) -> AdvisorResult<Self> {
        if body.trim().is_empty() {
            return Err(AdvisorError::Validation("empty response".to_string()));
        }
        let decision: Decision = serde_json::from_str(body)
            .map_err(|e| AdvisorError::Validation(format!("malformed response: {e}")))?;
        decision.validate()?;
        Ok(decision)
    }
}
