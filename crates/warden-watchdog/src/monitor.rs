//! Periodic watchdog pass over our open entry orders.
//!
//! Only entry orders carrying the entry-update prefix are considered. In
//! `shadow` mode decisions are logged and counted; only `active` mode
//! sends cancels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::{Clock, OpenOrder, OrderTag, Price};
use warden_exchange::{BackoffCoordinator, DynExchange, ExchangeError};
use warden_telemetry::Metrics;

use crate::error::WatchdogResult;
use crate::rules::{OrderClass, OrderObservation, WatchdogEvaluator};
use crate::volatility::{atr_pct, AtrConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogMode {
    #[default]
    Shadow,
    Active,
}

impl WatchdogMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shadow => "shadow",
            Self::Active => "active",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub mode: WatchdogMode,
    pub poll_interval_ms: u64,
    pub atr: AtrConfig,
}

/// Counts from one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub evaluated: usize,
    pub kept: usize,
    /// Cancel decisions, whether or not they were sent.
    pub flagged: usize,
    pub cancelled: usize,
    pub cancel_failures: usize,
    /// Orders skipped for lack of a mark price.
    pub skipped: usize,
    pub suspended: bool,
}

#[derive(Clone, Copy)]
struct MarketInputs {
    mark: Option<Price>,
    atr_pct: Option<f64>,
}

pub struct WatchdogMonitor {
    exchange: DynExchange,
    evaluator: WatchdogEvaluator,
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    backoff: Option<Arc<BackoffCoordinator>>,
}

impl WatchdogMonitor {
    pub fn new(
        exchange: DynExchange,
        evaluator: WatchdogEvaluator,
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            exchange,
            evaluator,
            config,
            clock,
            backoff: None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<BackoffCoordinator>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn mode(&self) -> WatchdogMode {
        self.config.mode
    }

    /// Evaluate every eligible order once.
    pub async fn run_once(&self) -> WatchdogResult<MonitorReport> {
        let mut report = MonitorReport::default();
        if self.backoff.as_ref().is_some_and(|b| b.is_suspended()) {
            debug!("Exchange suspended, watchdog pass skipped");
            report.suspended = true;
            return Ok(report);
        }

        let orders = self.exchange.list_open_orders(None).await?;
        let now_ms = self.clock.now_ms();
        let now = self.clock.now_utc();
        let mode = self.config.mode.as_str();
        let mut inputs: HashMap<String, MarketInputs> = HashMap::new();

        for order in orders
            .iter()
            .filter(|o| o.owner().is_tag(OrderTag::EntryUpdate))
        {
            let Some(class) = OrderClass::infer(order) else {
                continue;
            };
            let market = match inputs.get(&order.symbol) {
                Some(m) => *m,
                None => {
                    let m = self.market_inputs(&order.symbol).await;
                    inputs.insert(order.symbol.clone(), m);
                    m
                }
            };
            let Some(divergence_pct) = divergence_pct(order, market.mark) else {
                debug!(symbol = %order.symbol, order_id = %order.order_id, "No mark price, order not evaluated");
                report.skipped += 1;
                continue;
            };

            let obs = OrderObservation {
                class,
                age_minutes: order.age_minutes(now_ms),
                divergence_pct,
                atr_pct: market.atr_pct,
            };
            let decision = self.evaluator.evaluate(&obs, now);
            report.evaluated += 1;
            Metrics::watchdog_decision(decision.reason.as_str(), mode);

            if !decision.is_cancel() {
                report.kept += 1;
                continue;
            }
            report.flagged += 1;

            match self.config.mode {
                WatchdogMode::Shadow => {
                    info!(
                        symbol = %order.symbol,
                        order_id = %order.order_id,
                        class = class.as_str(),
                        reason = %decision.reason,
                        age_minutes = obs.age_minutes,
                        divergence_pct = obs.divergence_pct,
                        atr_pct = ?obs.atr_pct,
                        "Watchdog would cancel (shadow)"
                    );
                }
                WatchdogMode::Active => {
                    match self
                        .exchange
                        .cancel_order(&order.symbol, &order.order_id)
                        .await
                    {
                        Ok(()) => {
                            info!(
                                symbol = %order.symbol,
                                order_id = %order.order_id,
                                class = class.as_str(),
                                reason = %decision.reason,
                                age_minutes = obs.age_minutes,
                                "Watchdog cancelled stale entry order"
                            );
                            report.cancelled += 1;
                        }
                        Err(ExchangeError::OrderNotFound { .. }) => {
                            debug!(symbol = %order.symbol, order_id = %order.order_id, "Stale order already gone");
                        }
                        Err(e) => {
                            warn!(symbol = %order.symbol, order_id = %order.order_id, error = %e, "Watchdog cancel failed");
                            report.cancel_failures += 1;
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    async fn market_inputs(&self, symbol: &str) -> MarketInputs {
        let mark = match self.exchange.get_mark_price(symbol).await {
            Ok(p) if p.is_positive() => Some(p),
            Ok(_) => None,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to fetch mark price");
                None
            }
        };
        let atr = &self.config.atr;
        let atr_pct = match self
            .exchange
            .get_klines(symbol, &atr.interval, atr.kline_limit())
            .await
        {
            Ok(klines) => atr_pct(&klines, atr.period),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to fetch klines, ATR unavailable");
                None
            }
        };
        MarketInputs { mark, atr_pct }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            mode = self.config.mode.as_str(),
            poll_interval_ms = self.config.poll_interval_ms,
            cutoff = %self.evaluator.cutoff(),
            "Watchdog started"
        );

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.flagged > 0 => {
                            info!(?report, "Watchdog pass");
                        }
                        Ok(report) => debug!(?report, "Watchdog pass"),
                        Err(e) => warn!(error = %e, "Watchdog pass failed"),
                    }
                }
            }
        }

        info!("Watchdog stopped");
    }
}

fn divergence_pct(order: &OpenOrder, mark: Option<Price>) -> Option<f64> {
    order.effective_price()?.abs_pct_from(mark?)?.to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use warden_core::{Kline, ManualClock, OrderKind, OrderSide, Size};
    use warden_exchange::{ExchangeCall, MockExchange, MockOp};

    use crate::rules::{TtlConfig, WatchdogRules};

    const MINUTE: u64 = 60_000;

    fn at(hour: u32, minute: u32) -> u64 {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0)
            .unwrap()
            .timestamp_millis() as u64
    }

    fn entry(id: &str, client: &str, kind: OrderKind, price: Decimal, created_at_ms: u64) -> OpenOrder {
        let (limit, trigger) = match kind {
            OrderKind::Limit => (Some(Price::new(price)), None),
            _ => (None, Some(Price::new(price))),
        };
        OpenOrder {
            symbol: "BTCUSDT".to_string(),
            order_id: id.to_string(),
            client_order_id: client.to_string(),
            side: OrderSide::Buy,
            kind,
            price: limit,
            stop_price: trigger,
            quantity: Size::new(dec!(1)),
            reduce_only: false,
            created_at_ms,
        }
    }

    fn monitor(mock: &Arc<MockExchange>, clock: Arc<ManualClock>, mode: WatchdogMode) -> WatchdogMonitor {
        let evaluator = WatchdogEvaluator::new(&WatchdogRules {
            session_cutoff: "21:00".to_string(),
            divergence_multiplier: 2.0,
            support_ttl: TtlConfig::SUPPORT,
            breakout_ttl: TtlConfig::BREAKOUT,
        })
        .unwrap();
        WatchdogMonitor::new(
            mock.clone(),
            evaluator,
            MonitorConfig {
                mode,
                poll_interval_ms: 1_000,
                atr: AtrConfig {
                    interval: "1h".to_string(),
                    period: 2,
                },
            },
            clock,
        )
    }

    fn seed_market(mock: &MockExchange) {
        mock.set_mark_price("BTCUSDT", Price::new(dec!(100)));
        // ATR 1% of 100.
        let klines = (0..3)
            .map(|i| Kline {
                open_time_ms: i,
                high: Price::new(dec!(100.5)),
                low: Price::new(dec!(99.5)),
                close: Price::new(dec!(100)),
            })
            .collect();
        mock.set_klines("BTCUSDT", klines);
    }

    #[tokio::test]
    async fn test_active_mode_cancels_stale_entries() {
        let mock = Arc::new(MockExchange::new());
        seed_market(&mock);
        let now = at(9, 0);
        mock.add_open_order(entry("1", "wden-a", OrderKind::Limit, dec!(99.9), now - 65 * MINUTE));
        mock.add_open_order(entry("2", "wden-b", OrderKind::Limit, dec!(99.9), now - 5 * MINUTE));
        let clock = Arc::new(ManualClock::new(now));

        let report = monitor(&mock, clock, WatchdogMode::Active).run_once().await.unwrap();

        assert_eq!(report.evaluated, 2);
        assert_eq!(report.flagged, 1);
        assert_eq!(report.cancelled, 1);
        assert_eq!(mock.cancelled(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_shadow_mode_never_cancels() {
        let mock = Arc::new(MockExchange::new());
        seed_market(&mock);
        let now = at(21, 30);
        mock.add_open_order(entry("1", "wden-a", OrderKind::StopMarket, dec!(101), now - MINUTE));
        let clock = Arc::new(ManualClock::new(now));

        let report = monitor(&mock, clock, WatchdogMode::Shadow).run_once().await.unwrap();

        assert_eq!(report.flagged, 1);
        assert_eq!(report.cancelled, 0);
        assert!(mock.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_only_our_entry_orders_are_evaluated() {
        let mock = Arc::new(MockExchange::new());
        seed_market(&mock);
        let now = at(9, 0);
        let old = now - 120 * MINUTE;
        mock.add_open_order(entry("1", "web_manual", OrderKind::Limit, dec!(99), old));
        mock.add_open_order(entry("2", "wdsu-stop", OrderKind::StopMarket, dec!(95), old));
        let mut reduce_only = entry("3", "wden-r", OrderKind::Limit, dec!(110), old);
        reduce_only.reduce_only = true;
        mock.add_open_order(reduce_only);
        let clock = Arc::new(ManualClock::new(now));

        let report = monitor(&mock, clock, WatchdogMode::Active).run_once().await.unwrap();

        assert_eq!(report.evaluated, 0);
        assert!(mock.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_market_inputs_fetched_once_per_symbol() {
        let mock = Arc::new(MockExchange::new());
        seed_market(&mock);
        let now = at(9, 0);
        mock.add_open_order(entry("1", "wden-a", OrderKind::Limit, dec!(99.9), now));
        mock.add_open_order(entry("2", "wden-b", OrderKind::Limit, dec!(99.8), now));
        let clock = Arc::new(ManualClock::new(now));

        monitor(&mock, clock, WatchdogMode::Shadow).run_once().await.unwrap();

        let marks = mock
            .calls()
            .iter()
            .filter(|c| matches!(c, ExchangeCall::MarkPrice(_)))
            .count();
        assert_eq!(marks, 1);
    }

    #[tokio::test]
    async fn test_missing_mark_skips_order() {
        let mock = Arc::new(MockExchange::new());
        let now = at(9, 0);
        mock.add_open_order(entry("1", "wden-a", OrderKind::Limit, dec!(99), now - 65 * MINUTE));
        let clock = Arc::new(ManualClock::new(now));

        let report = monitor(&mock, clock, WatchdogMode::Active).run_once().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert!(mock.cancelled().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_failure_is_counted() {
        let mock = Arc::new(MockExchange::new());
        seed_market(&mock);
        let now = at(9, 0);
        mock.add_open_order(entry("1", "wden-a", OrderKind::Limit, dec!(99.9), now - 65 * MINUTE));
        mock.fail_always(MockOp::CancelOrder, 500);
        let clock = Arc::new(ManualClock::new(now));

        let report = monitor(&mock, clock, WatchdogMode::Active).run_once().await.unwrap();

        assert_eq!(report.cancel_failures, 1);
        assert_eq!(report.cancelled, 0);
    }

    #[tokio::test]
    async fn test_listing_failure_is_an_error() {
        let mock = Arc::new(MockExchange::new());
        mock.fail_always(MockOp::ListOpenOrders, 503);
        let clock = Arc::new(ManualClock::new(at(9, 0)));

        assert!(monitor(&mock, clock, WatchdogMode::Active).run_once().await.is_err());
    }
}
