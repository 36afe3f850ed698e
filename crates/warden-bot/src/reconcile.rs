//! Keeps subsystem registries in step with the exchange.
//!
//! Every pass lists positions (and, when entry orders are tracked, open
//! orders), schedules an entry for anything live that a registry has not
//! seen yet and completes waiting entries whose position or order is gone.
//! A key a subsystem completed on its own is not rescheduled while the
//! position it belongs to stays open, across restarts too: the registry
//! keeps completed keys in its snapshot until they stop being live.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_core::{OpenOrder, OrderTag};
use warden_exchange::{BackoffCoordinator, DynExchange, ExchangeResult};
use warden_scheduler::{EntryKey, EntryStatus, Registry};

use crate::config::ReconcileSection;

/// Which live objects a registry follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackScope {
    /// One entry per open position, keyed by symbol.
    Position,
    /// One entry per resting entry order we own, keyed by `symbol:orderId`.
    EntryOrder,
}

/// Registry view the reconciler works through, independent of payload type.
pub trait Tracker: Send + Sync {
    fn name(&self) -> &str;
    fn scope(&self) -> TrackScope;
    /// Apply the live key set; returns `(scheduled, completed)`.
    fn sync(&self, live: &HashSet<EntryKey>) -> (usize, usize);
}

pub struct Tracked<P> {
    registry: Arc<Registry<P>>,
    scope: TrackScope,
    initial_delay_ms: u64,
}

impl<P> Tracked<P>
where
    P: Clone + Default + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(registry: Arc<Registry<P>>, scope: TrackScope, initial_delay_ms: u64) -> Self {
        Self {
            registry,
            scope,
            initial_delay_ms,
        }
    }
}

impl<P> Tracker for Tracked<P>
where
    P: Clone + Default + Serialize + DeserializeOwned + Send + Sync,
{
    fn name(&self) -> &str {
        self.registry.name()
    }

    fn scope(&self) -> TrackScope {
        self.scope
    }

    fn sync(&self, live: &HashSet<EntryKey>) -> (usize, usize) {
        let mut scheduled = 0;
        let mut completed = 0;

        for key in live {
            if self.registry.contains(key) || self.registry.is_completed(key) {
                continue;
            }
            if self
                .registry
                .schedule(key.clone(), P::default(), self.initial_delay_ms)
            {
                info!(subsystem = self.name(), key = %key, "Scheduled new entry");
                scheduled += 1;
            }
        }

        for key in self.registry.keys() {
            if live.contains(&key) {
                continue;
            }
            // A running cycle finds the position gone and completes itself.
            let waiting = self
                .registry
                .get(&key)
                .is_some_and(|e| e.status == EntryStatus::Waiting);
            if waiting && self.registry.mark_completed(&key) {
                info!(subsystem = self.name(), key = %key, "Completed entry, no longer live");
                completed += 1;
            }
        }

        self.registry.forget_completed(live);
        (scheduled, completed)
    }
}

/// Counts from one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub completed: usize,
    pub suspended: bool,
}

pub struct Reconciler {
    exchange: DynExchange,
    trackers: Vec<Arc<dyn Tracker>>,
    config: ReconcileSection,
    backoff: Option<Arc<BackoffCoordinator>>,
}

impl Reconciler {
    pub fn new(exchange: DynExchange, config: ReconcileSection) -> Self {
        Self {
            exchange,
            trackers: Vec::new(),
            config,
            backoff: None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<BackoffCoordinator>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn track(&mut self, tracker: Arc<dyn Tracker>) {
        self.trackers.push(tracker);
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    pub async fn run_once(&self) -> ExchangeResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if self.backoff.as_ref().is_some_and(|b| b.is_suspended()) {
            debug!("Exchange suspended, reconcile pass skipped");
            report.suspended = true;
            return Ok(report);
        }

        let positions: HashSet<EntryKey> = self
            .exchange
            .list_positions()
            .await?
            .iter()
            .filter(|p| p.size.is_positive())
            .map(|p| EntryKey::position(&p.symbol))
            .collect();

        let entry_orders = if self
            .trackers
            .iter()
            .any(|t| t.scope() == TrackScope::EntryOrder)
        {
            self.exchange
                .list_open_orders(None)
                .await?
                .iter()
                .filter(|o| is_managed_entry(o))
                .map(|o| EntryKey::order(&o.symbol, &o.order_id))
                .collect()
        } else {
            HashSet::new()
        };

        for tracker in &self.trackers {
            let live = match tracker.scope() {
                TrackScope::Position => &positions,
                TrackScope::EntryOrder => &entry_orders,
            };
            let (scheduled, completed) = tracker.sync(live);
            report.scheduled += scheduled;
            report.completed += completed;
        }
        Ok(report)
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval_ms,
            trackers = self.trackers.len(),
            "Reconciler started"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Reconciler stopped");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(self.config.initial_delay_ms)) => {}
        }

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.scheduled + report.completed > 0 => {
                            info!(?report, "Reconcile pass");
                        }
                        Ok(report) => debug!(?report, "Reconcile pass"),
                        Err(e) => warn!(error = %e, "Reconcile pass failed"),
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }
}

fn is_managed_entry(order: &OpenOrder) -> bool {
    order.is_entry() && order.owner().is_tag(OrderTag::EntryUpdate)
}
