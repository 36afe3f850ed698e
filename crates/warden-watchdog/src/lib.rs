//! Stale entry-order watchdog.
//!
//! - `WatchdogEvaluator`: pure keep/cancel rules, first match wins
//!   (`SESSION_CUTOFF > TTL_HARD > DIVERGENCE > TTL_SOFT > KEEP`)
//! - `atr_pct`: volatility input from candles
//! - `WatchdogMonitor`: periodic loop over our entry orders, shadow or active

pub mod error;
pub mod monitor;
pub mod rules;
pub mod volatility;

pub use error::{WatchdogError, WatchdogResult};
pub use monitor::{MonitorConfig, MonitorReport, WatchdogMode, WatchdogMonitor};
pub use rules::{
    CancelReason, OrderClass, OrderObservation, TtlConfig, WatchdogAction, WatchdogDecision,
    WatchdogEvaluator, WatchdogRules,
};
pub use volatility::{atr_pct, AtrConfig};
