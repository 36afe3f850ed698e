//! Keep/cancel rules for stale entry orders.
//!
//! The evaluator is pure: it never touches the exchange and never decides
//! whether a cancel is actually sent. Rule order is fixed and the first
//! match wins.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::{OpenOrder, OrderKind, SessionCutoff};

use crate::error::{WatchdogError, WatchdogResult};

/// Divergence at or below this share of ATR counts as price having come
/// close to the order.
pub const APPROACH_ATR_FRACTION: f64 = 0.2;

/// Entry order flavour, each with its own TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderClass {
    /// Resting limit entry waiting for price to come back.
    Support,
    /// Stop entry waiting for price to break out.
    Breakout,
}

impl OrderClass {
    /// Classify an open order. Reduce-only and market orders are not
    /// entries and are never evaluated.
    pub fn infer(order: &OpenOrder) -> Option<Self> {
        if order.reduce_only {
            return None;
        }
        match order.kind {
            OrderKind::Limit => Some(Self::Support),
            OrderKind::StopMarket => Some(Self::Breakout),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Breakout => "breakout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogAction {
    Keep,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    SessionCutoff,
    TtlHard,
    Divergence,
    TtlSoft,
    Keep,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionCutoff => "SESSION_CUTOFF",
            Self::TtlHard => "TTL_HARD",
            Self::Divergence => "DIVERGENCE",
            Self::TtlSoft => "TTL_SOFT",
            Self::Keep => "KEEP",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogDecision {
    pub action: WatchdogAction,
    pub reason: CancelReason,
}

impl WatchdogDecision {
    const KEEP: Self = Self {
        action: WatchdogAction::Keep,
        reason: CancelReason::Keep,
    };

    fn cancel(reason: CancelReason) -> Self {
        Self {
            action: WatchdogAction::Cancel,
            reason,
        }
    }

    pub fn is_cancel(&self) -> bool {
        self.action == WatchdogAction::Cancel
    }
}

/// Age thresholds in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TtlConfig {
    pub hard_minutes: f64,
    pub soft_minutes: f64,
}

impl TtlConfig {
    pub const SUPPORT: Self = Self {
        hard_minutes: 60.0,
        soft_minutes: 30.0,
    };
    pub const BREAKOUT: Self = Self {
        hard_minutes: 30.0,
        soft_minutes: 15.0,
    };
}

/// Rule parameters as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogRules {
    /// `HH:MM`, UTC.
    pub session_cutoff: String,
    pub divergence_multiplier: f64,
    #[serde(default = "default_support_ttl")]
    pub support_ttl: TtlConfig,
    #[serde(default = "default_breakout_ttl")]
    pub breakout_ttl: TtlConfig,
}

fn default_support_ttl() -> TtlConfig {
    TtlConfig::SUPPORT
}

fn default_breakout_ttl() -> TtlConfig {
    TtlConfig::BREAKOUT
}

/// Inputs observed for one order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderObservation {
    pub class: OrderClass,
    pub age_minutes: f64,
    /// Absolute distance between order price and mark, percent of mark.
    pub divergence_pct: f64,
    /// `None` when no candles were available.
    pub atr_pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct WatchdogEvaluator {
    cutoff: SessionCutoff,
    divergence_multiplier: f64,
    support_ttl: TtlConfig,
    breakout_ttl: TtlConfig,
}

impl WatchdogEvaluator {
    /// Fails on an unparseable cutoff or non-positive parameters.
    pub fn new(rules: &WatchdogRules) -> WatchdogResult<Self> {
        let cutoff = SessionCutoff::parse(&rules.session_cutoff)?;
        if !(rules.divergence_multiplier.is_finite() && rules.divergence_multiplier > 0.0) {
            return Err(WatchdogError::InvalidConfig(format!(
                "divergence_multiplier must be positive, got {}",
                rules.divergence_multiplier
            )));
        }
        for (name, ttl) in [("support", rules.support_ttl), ("breakout", rules.breakout_ttl)] {
            if !(ttl.hard_minutes > 0.0 && ttl.soft_minutes > 0.0) {
                return Err(WatchdogError::InvalidConfig(format!(
                    "{name} TTLs must be positive"
                )));
            }
            if ttl.soft_minutes > ttl.hard_minutes {
                return Err(WatchdogError::InvalidConfig(format!(
                    "{name} soft TTL exceeds hard TTL"
                )));
            }
        }
        Ok(Self {
            cutoff,
            divergence_multiplier: rules.divergence_multiplier,
            support_ttl: rules.support_ttl,
            breakout_ttl: rules.breakout_ttl,
        })
    }

    pub fn cutoff(&self) -> SessionCutoff {
        self.cutoff
    }

    pub fn ttl(&self, class: OrderClass) -> TtlConfig {
        match class {
            OrderClass::Support => self.support_ttl,
            OrderClass::Breakout => self.breakout_ttl,
        }
    }

    #[must_use]
    pub fn evaluate(&self, obs: &OrderObservation, now: DateTime<Utc>) -> WatchdogDecision {
        if self.cutoff.has_passed(now) {
            return WatchdogDecision::cancel(CancelReason::SessionCutoff);
        }

        let ttl = self.ttl(obs.class);
        if obs.age_minutes >= ttl.hard_minutes {
            return WatchdogDecision::cancel(CancelReason::TtlHard);
        }

        let atr = obs.atr_pct.filter(|a| a.is_finite() && *a > 0.0);
        if let Some(atr) = atr {
            if obs.divergence_pct > atr * self.divergence_multiplier {
                return WatchdogDecision::cancel(CancelReason::Divergence);
            }
        }

        let approached = atr.is_some_and(|a| obs.divergence_pct <= APPROACH_ATR_FRACTION * a);
        if obs.age_minutes >= ttl.soft_minutes && !approached {
            return WatchdogDecision::cancel(CancelReason::TtlSoft);
        }

        WatchdogDecision::KEEP
    }
}
