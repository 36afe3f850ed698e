//! Application configuration.
//!
//! Dispatcher fields every subsystem must set (`enabled`,
//! `poll_interval_ms`, `max_concurrent_decisions`, `cooldown_floor_ms`,
//! `jitter_min_ms`, `jitter_max_ms`) and the watchdog's `session_cutoff`
//! and `divergence_multiplier` have no defaults: a file that omits them
//! fails to load.

use std::path::PathBuf;

use serde::Deserialize;
use warden_advisor::HttpAdvisorConfig;
use warden_core::JitterWindow;
use warden_exchange::{BackoffConfig, RestConfig};
use warden_scheduler::DispatcherConfig;
use warden_watchdog::{AtrConfig, MonitorConfig, WatchdogEvaluator, WatchdogMode, WatchdogRules};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeSection,
    pub advisor: HttpAdvisorConfig,
    pub registry: RegistrySection,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    pub subsystems: SubsystemsSection,
    pub watchdog: WatchdogSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSection {
    pub base_url: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Request weight allowed per minute.
    #[serde(default = "default_weight_limit")]
    pub weight_limit: u32,
    /// Pause every loop once this share of the weight budget is used.
    #[serde(default = "default_weight_threshold_pct")]
    pub weight_threshold_pct: f64,
    #[serde(default = "default_retry_after_ms")]
    pub default_retry_after_ms: u64,
}

fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_weight_limit() -> u32 {
    2_400
}

fn default_weight_threshold_pct() -> f64 {
    80.0
}

fn default_retry_after_ms() -> u64 {
    60_000
}

impl ExchangeSection {
    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            base_url: self.base_url.clone(),
            recv_window_ms: self.recv_window_ms,
            request_timeout_ms: self.request_timeout_ms,
        }
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            weight_limit: self.weight_limit,
            weight_threshold_pct: self.weight_threshold_pct,
            default_retry_after_ms: self.default_retry_after_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySection {
    /// One `<subsystem>.json` snapshot per registry.
    pub data_dir: PathBuf,
    /// Rehydration ceiling. Default: 6 hours.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_max_age_secs() -> u64 {
    6 * 60 * 60
}

impl RegistrySection {
    pub fn max_age_ms(&self) -> u64 {
        self.max_age_secs.saturating_mul(1000)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReconcileSection {
    #[serde(default = "default_reconcile_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_reconcile_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

fn default_reconcile_interval_ms() -> u64 {
    30_000
}

fn default_reconcile_initial_delay_ms() -> u64 {
    5_000
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            interval_ms: default_reconcile_interval_ms(),
            initial_delay_ms: default_reconcile_initial_delay_ms(),
        }
    }
}

/// Dispatcher settings shared by every subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct SubsystemConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub max_concurrent_decisions: usize,
    pub cooldown_floor_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    /// Base delay between cycles of one entity. Default: 15 minutes.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Delay before the first cycle of a newly scheduled entity.
    #[serde(default)]
    pub initial_delay_ms: u64,
}

fn default_interval_ms() -> u64 {
    15 * 60 * 1000
}

fn default_error_backoff_ms() -> u64 {
    60_000
}

fn default_task_timeout_ms() -> u64 {
    60_000
}

impl SubsystemConfig {
    pub fn dispatcher_config(&self) -> AppResult<DispatcherConfig> {
        Ok(DispatcherConfig {
            poll_interval_ms: self.poll_interval_ms,
            max_concurrent_decisions: self.max_concurrent_decisions,
            interval_ms: self.interval_ms,
            cooldown_floor_ms: self.cooldown_floor_ms,
            error_backoff_ms: self.error_backoff_ms,
            task_timeout_ms: self.task_timeout_ms,
            jitter: JitterWindow::new(self.jitter_min_ms, self.jitter_max_ms)?,
        })
    }

    fn validate(&self, name: &str) -> AppResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config(format!("{name}.poll_interval_ms must be > 0")));
        }
        if self.max_concurrent_decisions == 0 {
            return Err(AppError::Config(format!(
                "{name}.max_concurrent_decisions must be > 0"
            )));
        }
        if self.task_timeout_ms == 0 {
            return Err(AppError::Config(format!("{name}.task_timeout_ms must be > 0")));
        }
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(AppError::Config(format!(
                "{name}.jitter_min_ms ({}) exceeds jitter_max_ms ({})",
                self.jitter_min_ms, self.jitter_max_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopUpConfig {
    #[serde(flatten)]
    pub dispatch: SubsystemConfig,
    /// Top-ups per position before the entry completes.
    #[serde(default = "default_max_top_ups")]
    pub max_top_ups: u32,
}

fn default_max_top_ups() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubsystemsSection {
    pub strategy_update: SubsystemConfig,
    pub profit_taker: SubsystemConfig,
    pub top_up: TopUpConfig,
    pub entry_update: SubsystemConfig,
    pub health: SubsystemConfig,
}

impl SubsystemsSection {
    fn all(&self) -> [(&'static str, &SubsystemConfig); 5] {
        [
            ("strategy_update", &self.strategy_update),
            ("profit_taker", &self.profit_taker),
            ("top_up", &self.top_up.dispatch),
            ("entry_update", &self.entry_update),
            ("health", &self.health),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogSection {
    pub enabled: bool,
    #[serde(default)]
    pub mode: WatchdogMode,
    #[serde(default = "default_watchdog_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(flatten)]
    pub rules: WatchdogRules,
    #[serde(default)]
    pub atr: AtrConfig,
}

fn default_watchdog_poll_interval_ms() -> u64 {
    60_000
}

impl WatchdogSection {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            mode: self.mode,
            poll_interval_ms: self.poll_interval_ms,
            atr: self.atr.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TelemetrySection {
    /// Port for `/metrics`; 0 disables the endpoint.
    #[serde(default)]
    pub metrics_port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject values that would parse but cannot run.
    pub fn validate(&self) -> AppResult<()> {
        for (name, subsystem) in self.subsystems.all() {
            subsystem.validate(name)?;
        }

        if !(0.0..=1.0).contains(&self.advisor.min_confidence) {
            return Err(AppError::Config(format!(
                "advisor.min_confidence {} outside [0, 1]",
                self.advisor.min_confidence
            )));
        }
        if self.advisor.timeout_ms == 0 {
            return Err(AppError::Config("advisor.timeout_ms must be > 0".to_string()));
        }

        let pct = self.exchange.weight_threshold_pct;
        if !(pct > 0.0 && pct <= 100.0) {
            return Err(AppError::Config(format!(
                "exchange.weight_threshold_pct {pct} outside (0, 100]"
            )));
        }

        if self.reconcile.interval_ms == 0 {
            return Err(AppError::Config("reconcile.interval_ms must be > 0".to_string()));
        }

        // Builds the evaluator once to reject a bad cutoff or TTL table.
        WatchdogEvaluator::new(&self.watchdog.rules)?;
        if self.watchdog.atr.period == 0 {
            return Err(AppError::Config("watchdog.atr.period must be > 0".to_string()));
        }
        Ok(())
    }
}
