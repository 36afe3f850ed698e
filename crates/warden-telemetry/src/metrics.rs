//! Prometheus metrics for the warden.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error that should crash
//! at first use rather than silently drop data.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    register_int_gauge_vec, CounterVec, GaugeVec, HistogramVec, IntGauge, IntGaugeVec,
};

/// Dispatch outcomes.
/// Labels: subsystem, outcome (rescheduled/completed/error/timeout)
pub static DISPATCH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "warden_dispatch_total",
        "Dispatched registry entries by outcome",
        &["subsystem", "outcome"]
    )
    .unwrap()
});

/// Handler duration in milliseconds.
pub static DISPATCH_DURATION_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "warden_dispatch_duration_ms",
        "Per-entry handler duration in milliseconds",
        &["subsystem"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]
    )
    .unwrap()
});

/// Entries currently held by each registry.
pub static REGISTRY_ENTRIES: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "warden_registry_entries",
        "Entries held by each subsystem registry",
        &["subsystem"]
    )
    .unwrap()
});

/// Ticks skipped because the backoff coordinator was suspended.
pub static DISPATCH_SKIPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "warden_dispatch_skipped_total",
        "Dispatcher ticks skipped during rate-limit suspension",
        &["subsystem"]
    )
    .unwrap()
});

/// Sequencer exchange actions.
/// Labels: tag, action (place_stop/place_target/cancel/exit/top_up/keep/adopt/cancel_failed)
pub static SEQUENCER_ACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "warden_sequencer_actions_total",
        "Order sequencer actions",
        &["tag", "action"]
    )
    .unwrap()
});

/// Watchdog decisions.
/// Labels: reason, mode (shadow/active)
pub static WATCHDOG_DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "warden_watchdog_decisions_total",
        "Watchdog keep/cancel decisions",
        &["reason", "mode"]
    )
    .unwrap()
});

/// Rate-limit suspensions.
/// Labels: cause (weight/429/418)
pub static BACKOFF_SUSPENSIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "warden_backoff_suspensions_total",
        "Rate-limit suspensions by cause",
        &["cause"]
    )
    .unwrap()
});

/// Last observed request weight in the current minute.
pub static EXCHANGE_USED_WEIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "warden_exchange_used_weight",
        "Last observed exchange request weight (1m window)"
    )
    .unwrap()
});

/// Position health score (0-100).
pub static HEALTH_SCORE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "warden_health_score",
        "Deterministic position health score",
        &["symbol"]
    )
    .unwrap()
});

/// Metrics recording helper.
pub struct Metrics;

impl Metrics {
    pub fn dispatch_outcome(subsystem: &str, outcome: &str) {
        DISPATCH_TOTAL.with_label_values(&[subsystem, outcome]).inc();
    }

    pub fn dispatch_duration(subsystem: &str, duration_ms: f64) {
        DISPATCH_DURATION_MS
            .with_label_values(&[subsystem])
            .observe(duration_ms);
    }

    pub fn registry_size(subsystem: &str, entries: usize) {
        REGISTRY_ENTRIES
            .with_label_values(&[subsystem])
            .set(entries as i64);
    }

    pub fn dispatch_skipped(subsystem: &str) {
        DISPATCH_SKIPPED_TOTAL.with_label_values(&[subsystem]).inc();
    }

    pub fn sequencer_action(tag: &str, action: &str) {
        SEQUENCER_ACTIONS_TOTAL
            .with_label_values(&[tag, action])
            .inc();
    }

    pub fn watchdog_decision(reason: &str, mode: &str) {
        WATCHDOG_DECISIONS_TOTAL
            .with_label_values(&[reason, mode])
            .inc();
    }

    pub fn backoff_suspended(cause: &str) {
        BACKOFF_SUSPENSIONS_TOTAL.with_label_values(&[cause]).inc();
    }

    pub fn used_weight(weight: u32) {
        EXCHANGE_USED_WEIGHT.set(i64::from(weight));
    }

    pub fn health_score(symbol: &str, score: f64) {
        HEALTH_SCORE.with_label_values(&[symbol]).set(score);
    }

    /// Remove the health gauge of a closed position.
    pub fn clear_health_score(symbol: &str) {
        let _ = HEALTH_SCORE.remove_label_values(&[symbol]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let before = DISPATCH_TOTAL
            .with_label_values(&["test_subsystem", "completed"])
            .get();
        Metrics::dispatch_outcome("test_subsystem", "completed");
        Metrics::dispatch_outcome("test_subsystem", "completed");
        let after = DISPATCH_TOTAL
            .with_label_values(&["test_subsystem", "completed"])
            .get();
        assert_eq!(after - before, 2.0);
    }

    #[test]
    fn test_health_gauge_set_and_clear() {
        Metrics::health_score("TESTUSDT", 72.5);
        assert_eq!(HEALTH_SCORE.with_label_values(&["TESTUSDT"]).get(), 72.5);
        Metrics::clear_health_score("TESTUSDT");
        Metrics::clear_health_score("TESTUSDT");
    }
}
