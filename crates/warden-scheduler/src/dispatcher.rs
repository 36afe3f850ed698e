//! Due-task dispatcher.
//!
//! One dispatcher per subsystem. Each tick claims due entries (never more
//! than `max_concurrent_decisions`), runs the handler on all of them
//! concurrently under a per-task timeout, and writes every outcome back
//! before the next tick. A failing entry never affects the others.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::{BoxFuture, Clock, JitterWindow};
use warden_exchange::BackoffCoordinator;
use warden_telemetry::Metrics;

use crate::entry::{EntryKey, ScheduledEntry};
use crate::error::{TaskError, TaskResult};
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatcherConfig {
    pub poll_interval_ms: u64,
    pub max_concurrent_decisions: usize,
    /// Base delay between successful cycles.
    pub interval_ms: u64,
    /// Lower bound for every reschedule delay.
    pub cooldown_floor_ms: u64,
    /// Base delay after a failed cycle.
    pub error_backoff_ms: u64,
    pub task_timeout_ms: u64,
    pub jitter: JitterWindow,
}

impl DispatcherConfig {
    /// `max(base, cooldown_floor) + jitter`
    pub fn next_delay(&self, base_ms: u64) -> u64 {
        self.jitter.apply(base_ms.max(self.cooldown_floor_ms))
    }

    pub fn error_delay(&self) -> u64 {
        self.next_delay(self.error_backoff_ms)
    }
}

/// What the handler wants done with the entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<P> {
    Reschedule {
        /// Replacement payload.
        payload: Option<P>,
        /// Overrides the configured interval.
        delay_ms: Option<u64>,
        /// Set when the cycle only partly succeeded; recorded as `last_error`.
        degraded: Option<String>,
    },
    Complete {
        reason: String,
    },
}

impl<P> Outcome<P> {
    pub fn reschedule() -> Self {
        Self::Reschedule {
            payload: None,
            delay_ms: None,
            degraded: None,
        }
    }

    pub fn reschedule_after(delay_ms: u64) -> Self {
        Self::Reschedule {
            payload: None,
            delay_ms: Some(delay_ms),
            degraded: None,
        }
    }

    pub fn complete(reason: impl Into<String>) -> Self {
        Self::Complete {
            reason: reason.into(),
        }
    }

    /// Attach a replacement payload. No effect on `Complete`.
    #[must_use]
    pub fn with_payload(self, new_payload: P) -> Self {
        match self {
            Self::Reschedule {
                delay_ms, degraded, ..
            } => Self::Reschedule {
                payload: Some(new_payload),
                delay_ms,
                degraded,
            },
            other => other,
        }
    }

    /// Mark a partial success. No effect on `Complete`.
    #[must_use]
    pub fn degraded(self, note: impl Into<String>) -> Self {
        match self {
            Self::Reschedule {
                payload, delay_ms, ..
            } => Self::Reschedule {
                payload,
                delay_ms,
                degraded: Some(note.into()),
            },
            other => other,
        }
    }
}

/// Decision-then-execute pipeline for one entry.
pub trait EntryHandler<P>: Send + Sync {
    fn handle(&self, entry: ScheduledEntry<P>) -> BoxFuture<'_, TaskResult<Outcome<P>>>;
}

/// Result of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub rescheduled: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Tick skipped because of a rate-limit suspension.
    pub suspended: bool,
}

pub struct Dispatcher<P, H> {
    name: String,
    registry: Arc<Registry<P>>,
    handler: Arc<H>,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    backoff: Option<Arc<BackoffCoordinator>>,
}

impl<P, H> Dispatcher<P, H>
where
    P: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    H: EntryHandler<P> + 'static,
{
    pub fn new(
        registry: Arc<Registry<P>>,
        handler: Arc<H>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: registry.name().to_string(),
            registry,
            handler,
            config,
            clock,
            backoff: None,
        }
    }

    /// Skip ticks while `backoff` reports a suspension.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<BackoffCoordinator>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<Registry<P>> {
        &self.registry
    }

    /// Run one dispatch cycle.
    pub async fn process_due_entries(&self) -> DispatchReport {
        let mut report = DispatchReport::default();

        if let Some(remaining) = self.backoff.as_ref().and_then(|b| b.remaining_ms()) {
            debug!(subsystem = %self.name, remaining_ms = remaining, "Dispatch skipped, rate limit suspension");
            Metrics::dispatch_skipped(&self.name);
            report.suspended = true;
            return report;
        }

        let now = self.clock.now_ms();
        let claimed = self
            .registry
            .claim_due(now, self.config.max_concurrent_decisions);
        report.claimed = claimed.len();
        if claimed.is_empty() {
            return report;
        }
        debug!(subsystem = %self.name, claimed = claimed.len(), "Dispatching due entries");

        let timeout = Duration::from_millis(self.config.task_timeout_ms);
        let tasks = claimed.into_iter().map(|entry| {
            let key = entry.key.clone();
            async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(timeout, self.handler.handle(entry)).await {
                    Ok(result) => result,
                    Err(_) => Err(TaskError::Timeout(self.config.task_timeout_ms)),
                };
                Metrics::dispatch_duration(&self.name, started.elapsed().as_secs_f64() * 1000.0);
                (key, result)
            }
        });

        for (key, result) in join_all(tasks).await {
            self.apply(&key, result, &mut report);
        }
        report
    }

    fn apply(&self, key: &EntryKey, result: TaskResult<Outcome<P>>, report: &mut DispatchReport) {
        match result {
            Ok(Outcome::Reschedule {
                payload,
                delay_ms,
                degraded,
            }) => {
                if let Some(payload) = payload {
                    self.registry.update_payload(key, |p| *p = payload);
                }
                if let Some(note) = degraded {
                    warn!(subsystem = %self.name, key = %key, note = %note, "Cycle partially executed");
                    self.registry.mark_error(key, &note);
                }
                let delay = self
                    .config
                    .next_delay(delay_ms.unwrap_or(self.config.interval_ms));
                if self.registry.reschedule(key, delay) {
                    debug!(subsystem = %self.name, key = %key, delay_ms = delay, "Entry rescheduled");
                } else {
                    debug!(subsystem = %self.name, key = %key, "Entry vanished while processing");
                }
                report.rescheduled += 1;
                Metrics::dispatch_outcome(&self.name, "rescheduled");
            }
            Ok(Outcome::Complete { reason }) => {
                info!(subsystem = %self.name, key = %key, reason = %reason, "Entry completed");
                self.registry.mark_completed(key);
                report.completed += 1;
                Metrics::dispatch_outcome(&self.name, "completed");
            }
            Err(e) => {
                match &e {
                    TaskError::Validation(_) => {
                        warn!(subsystem = %self.name, key = %key, error = %e, "Advisor response rejected")
                    }
                    TaskError::Fatal(_) => {
                        error!(subsystem = %self.name, key = %key, error = %e, "Entry cycle failed")
                    }
                    _ => warn!(subsystem = %self.name, key = %key, error = %e, "Entry cycle failed"),
                }
                self.registry.mark_error(key, &e.to_string());
                let delay = self.config.error_delay();
                self.registry.reschedule(key, delay);
                if matches!(e, TaskError::Timeout(_)) {
                    report.timed_out += 1;
                    Metrics::dispatch_outcome(&self.name, "timeout");
                } else {
                    report.failed += 1;
                    Metrics::dispatch_outcome(&self.name, "error");
                }
            }
        }
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            subsystem = %self.name,
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_decisions,
            entries = self.registry.len(),
            "Dispatcher started"
        );

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.process_due_entries().await;
                    if report.claimed > 0 {
                        debug!(subsystem = %self.name, ?report, "Dispatch tick");
                    }
                }
            }
        }

        info!(subsystem = %self.name, "Dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use warden_core::ManualClock;
    use warden_exchange::{BackoffConfig, SuspendCause};
    use warden_persistence::MemoryStore;

    use crate::entry::EntryStatus;
    use crate::registry::DEFAULT_MAX_AGE_MS;

    const T0: u64 = 1_700_000_000_000;

    enum Script {
        Ok(Outcome<u32>),
        Fail,
        Hang,
    }

    /// Handler answering per symbol; unscripted symbols reschedule.
    struct ScriptedHandler {
        scripts: Mutex<HashMap<String, Script>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedHandler {
        fn new() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn script(&self, symbol: &str, script: Script) {
            self.scripts.lock().insert(symbol.to_string(), script);
        }
    }

    impl EntryHandler<u32> for ScriptedHandler {
        fn handle(&self, entry: ScheduledEntry<u32>) -> BoxFuture<'_, TaskResult<Outcome<u32>>> {
            Box::pin(async move {
                self.seen.lock().push(entry.key.to_string());
                let script = self.scripts.lock().remove(entry.key.as_str());
                match script {
                    Some(Script::Ok(outcome)) => Ok(outcome),
                    Some(Script::Fail) => Err(TaskError::Transient("exchange down".into())),
                    Some(Script::Hang) => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(Outcome::reschedule())
                    }
                    None => Ok(Outcome::reschedule()),
                }
            })
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            poll_interval_ms: 10,
            max_concurrent_decisions: 2,
            interval_ms: 60_000,
            cooldown_floor_ms: 30_000,
            error_backoff_ms: 5_000,
            task_timeout_ms: 50,
            jitter: JitterWindow::none(),
        }
    }

    fn setup() -> (
        Arc<ManualClock>,
        Arc<Registry<u32>>,
        Arc<ScriptedHandler>,
        Dispatcher<u32, ScriptedHandler>,
    ) {
        let clock = Arc::new(ManualClock::new(T0));
        let registry = Arc::new(Registry::new(
            "test",
            Arc::new(MemoryStore::new()),
            clock.clone(),
            DEFAULT_MAX_AGE_MS,
        ));
        let handler = Arc::new(ScriptedHandler::new());
        let dispatcher = Dispatcher::new(registry.clone(), handler.clone(), config(), clock.clone());
        (clock, registry, handler, dispatcher)
    }

    #[test]
    fn test_delays_respect_cooldown_floor() {
        let cfg = config();
        assert_eq!(cfg.next_delay(60_000), 60_000);
        assert_eq!(cfg.next_delay(1_000), 30_000);
        assert_eq!(cfg.error_delay(), 30_000);
    }

    #[tokio::test]
    async fn test_caps_concurrency_and_reschedules() {
        let (_, registry, handler, dispatcher) = setup();
        for s in ["A", "B", "C"] {
            registry.schedule(EntryKey::position(s), 0, 0);
        }

        let report = dispatcher.process_due_entries().await;
        assert_eq!(report.claimed, 2);
        assert_eq!(report.rescheduled, 2);
        assert_eq!(handler.seen.lock().clone(), vec!["A", "B"]);

        let a = registry.get(&EntryKey::position("A")).unwrap();
        assert_eq!(a.status, EntryStatus::Waiting);
        assert_eq!(a.cycle_index, 1);
        assert_eq!(a.trigger_at_ms, T0 + 60_000);

        // C is still due and picked up on the next tick.
        let report = dispatcher.process_due_entries().await;
        assert_eq!(report.claimed, 1);
        assert_eq!(handler.seen.lock().last().map(String::as_str), Some("C"));
    }

    #[tokio::test]
    async fn test_error_isolated_and_backed_off() {
        let (_, registry, handler, dispatcher) = setup();
        registry.schedule(EntryKey::position("A"), 0, 0);
        registry.schedule(EntryKey::position("B"), 0, 0);
        handler.script("A", Script::Fail);

        let report = dispatcher.process_due_entries().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.rescheduled, 1);

        let a = registry.get(&EntryKey::position("A")).unwrap();
        assert_eq!(a.status, EntryStatus::Waiting);
        assert_eq!(a.last_error.as_deref(), Some("transient: exchange down"));
        // max(error_backoff 5s, floor 30s)
        assert_eq!(a.trigger_at_ms, T0 + 30_000);

        let b = registry.get(&EntryKey::position("B")).unwrap();
        assert!(b.last_error.is_none());
    }

    #[tokio::test]
    async fn test_timeout_counts_as_error() {
        let (_, registry, handler, dispatcher) = setup();
        registry.schedule(EntryKey::position("A"), 0, 0);
        handler.script("A", Script::Hang);

        let report = dispatcher.process_due_entries().await;
        assert_eq!(report.timed_out, 1);
        let a = registry.get(&EntryKey::position("A")).unwrap();
        assert_eq!(a.status, EntryStatus::Waiting);
        assert!(a.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_complete_and_payload_override() {
        let (_, registry, handler, dispatcher) = setup();
        registry.schedule(EntryKey::position("A"), 0, 0);
        registry.schedule(EntryKey::position("B"), 0, 0);
        handler.script("A", Script::Ok(Outcome::complete("done")));
        handler.script(
            "B",
            Script::Ok(
                Outcome::reschedule_after(1_000)
                    .with_payload(7)
                    .degraded("targets failed"),
            ),
        );

        let report = dispatcher.process_due_entries().await;
        assert_eq!(report.completed, 1);
        assert!(!registry.contains(&EntryKey::position("A")));

        let b = registry.get(&EntryKey::position("B")).unwrap();
        assert_eq!(b.payload, 7);
        assert_eq!(b.last_error.as_deref(), Some("targets failed"));
        // Override below the floor is clamped.
        assert_eq!(b.trigger_at_ms, T0 + 30_000);
    }

    #[tokio::test]
    async fn test_skips_tick_while_suspended() {
        let (clock, registry, handler, dispatcher) = setup();
        let backoff = Arc::new(BackoffCoordinator::new(BackoffConfig::default(), clock.clone()));
        let dispatcher = dispatcher.with_backoff(backoff.clone());
        registry.schedule(EntryKey::position("A"), 0, 0);

        backoff.suspend_until(T0 + 1_000, SuspendCause::TooManyRequests);
        let report = dispatcher.process_due_entries().await;
        assert!(report.suspended);
        assert_eq!(report.claimed, 0);
        assert!(handler.seen.lock().is_empty());

        clock.advance(1_000);
        let report = dispatcher.process_due_entries().await;
        assert_eq!(report.claimed, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (_, registry, handler, dispatcher) = setup();
        registry.schedule(EntryKey::position("A"), 0, 0);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(handler.seen.lock().clone(), vec!["A"]);
    }
}
