//! Main application orchestration.
//!
//! Builds one registry and dispatcher per enabled subsystem, the
//! reconciler, the watchdog and the metrics endpoint, runs them as
//! independent tasks and stops them together on Ctrl-C.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use warden_advisor::{DynAdvisor, HttpDecisionAdapter};
use warden_core::{Clock, SystemClock};
use warden_exchange::{BackoffCoordinator, Credentials, DynExchange, RestExchangeClient};
use warden_persistence::JsonFileStore;
use warden_scheduler::{Dispatcher, DispatcherConfig, EntryHandler, Registry};
use warden_watchdog::{WatchdogEvaluator, WatchdogMonitor};

use crate::config::{AppConfig, SubsystemConfig};
use crate::error::AppResult;
use crate::reconcile::{Reconciler, TrackScope, Tracked};
use crate::subsystems::{
    entry, health, profit, strategy, top_up, EntryPayload, EntryUpdateHandler, HealthHandler,
    HealthPayload, ProfitPayload, ProfitTakerHandler, StrategyPayload, StrategyUpdateHandler,
    SubsystemContext, TopUpHandler, TopUpPayload,
};

/// Main application.
pub struct Application {
    config: AppConfig,
    exchange: DynExchange,
    advisor: DynAdvisor,
    clock: Arc<dyn Clock>,
    backoff: Arc<BackoffCoordinator>,
}

impl Application {
    /// Create the application against the live exchange and advisor.
    ///
    /// Fails when credentials are missing from the environment.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backoff = Arc::new(BackoffCoordinator::new(
            config.exchange.backoff_config(),
            clock.clone(),
        ));
        let exchange: DynExchange = Arc::new(RestExchangeClient::new(
            config.exchange.rest_config(),
            Credentials::from_env()?,
            backoff.clone(),
            clock.clone(),
        )?);
        let advisor: DynAdvisor = Arc::new(HttpDecisionAdapter::new(config.advisor.clone())?);
        Ok(Self::with_components(config, exchange, advisor, clock, backoff))
    }

    /// Create the application from prebuilt collaborators.
    pub fn with_components(
        config: AppConfig,
        exchange: DynExchange,
        advisor: DynAdvisor,
        clock: Arc<dyn Clock>,
        backoff: Arc<BackoffCoordinator>,
    ) -> Self {
        Self {
            config,
            exchange,
            advisor,
            clock,
            backoff,
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let shutdown = CancellationToken::new();
        let handles = self.spawn(shutdown.clone())?;
        info!(tasks = handles.len(), "Warden running");

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown.cancel();

        for result in futures_util::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Task ended abnormally");
            }
        }
        info!("Shutdown complete");
        Ok(())
    }

    /// Start every enabled loop; each stops when `shutdown` is cancelled.
    pub fn spawn(&self, shutdown: CancellationToken) -> AppResult<Vec<JoinHandle<()>>> {
        std::fs::create_dir_all(&self.config.registry.data_dir)?;

        let ctx = SubsystemContext::new(self.exchange.clone(), self.advisor.clone());
        let subsystems = &self.config.subsystems;
        let mut reconciler = Reconciler::new(self.exchange.clone(), self.config.reconcile)
            .with_backoff(self.backoff.clone());
        let mut handles = Vec::new();

        if subsystems.strategy_update.enabled {
            let launcher = self.launcher(
                strategy::NAME,
                &subsystems.strategy_update,
                TrackScope::Position,
                shutdown.clone(),
            );
            let handler = StrategyUpdateHandler::new(ctx.clone());
            handles.push(launcher.start::<StrategyPayload, _>(&mut reconciler, |_, _| handler)?);
        }
        if subsystems.profit_taker.enabled {
            let launcher = self.launcher(
                profit::NAME,
                &subsystems.profit_taker,
                TrackScope::Position,
                shutdown.clone(),
            );
            let handler = ProfitTakerHandler::new(ctx.clone());
            handles.push(launcher.start::<ProfitPayload, _>(&mut reconciler, |_, _| handler)?);
        }
        if subsystems.top_up.dispatch.enabled {
            let launcher = self.launcher(
                top_up::NAME,
                &subsystems.top_up.dispatch,
                TrackScope::Position,
                shutdown.clone(),
            );
            let handler = TopUpHandler::new(ctx.clone(), subsystems.top_up.max_top_ups);
            handles.push(launcher.start::<TopUpPayload, _>(&mut reconciler, |_, _| handler)?);
        }
        if subsystems.entry_update.enabled {
            let launcher = self.launcher(
                entry::NAME,
                &subsystems.entry_update,
                TrackScope::EntryOrder,
                shutdown.clone(),
            );
            let ctx = ctx.clone();
            handles.push(launcher.start::<EntryPayload, _>(&mut reconciler, |registry, dispatch| {
                EntryUpdateHandler::new(ctx, registry, dispatch)
            })?);
        }
        if subsystems.health.enabled {
            let launcher = self.launcher(
                health::NAME,
                &subsystems.health,
                TrackScope::Position,
                shutdown.clone(),
            );
            let handler = HealthHandler::new(ctx);
            handles.push(launcher.start::<HealthPayload, _>(&mut reconciler, |_, _| handler)?);
        }

        if reconciler.tracker_count() > 0 {
            handles.push(tokio::spawn(reconciler.run(shutdown.clone())));
        }

        if self.config.watchdog.enabled {
            let evaluator = WatchdogEvaluator::new(&self.config.watchdog.rules)?;
            let monitor = WatchdogMonitor::new(
                self.exchange.clone(),
                evaluator,
                self.config.watchdog.monitor_config(),
                self.clock.clone(),
            )
            .with_backoff(self.backoff.clone());
            handles.push(tokio::spawn(monitor.run(shutdown.clone())));
        }

        let port = self.config.telemetry.metrics_port;
        if port != 0 {
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = warden_telemetry::serve_metrics(port, token).await {
                    error!(error = %e, port, "Metrics server failed");
                }
            }));
        }

        Ok(handles)
    }

    fn launcher(
        &self,
        name: &str,
        config: &SubsystemConfig,
        scope: TrackScope,
        shutdown: CancellationToken,
    ) -> SubsystemLauncher<'_> {
        SubsystemLauncher {
            app: self,
            name: name.to_string(),
            config: config.clone(),
            scope,
            shutdown,
        }
    }
}

/// Registry, tracker and dispatcher for one subsystem.
struct SubsystemLauncher<'a> {
    app: &'a Application,
    name: String,
    config: SubsystemConfig,
    scope: TrackScope,
    shutdown: CancellationToken,
}

impl SubsystemLauncher<'_> {
    fn start<P, H>(
        self,
        reconciler: &mut Reconciler,
        build: impl FnOnce(Arc<Registry<P>>, DispatcherConfig) -> H,
    ) -> AppResult<JoinHandle<()>>
    where
        P: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static,
        H: EntryHandler<P> + 'static,
    {
        let app = self.app;
        let store = JsonFileStore::in_dir(&app.config.registry.data_dir, &self.name);
        let registry = Arc::new(Registry::new(
            self.name.clone(),
            Arc::new(store),
            app.clock.clone(),
            app.config.registry.max_age_ms(),
        ));
        let restored = registry.rehydrate();
        let dispatch = self.config.dispatcher_config()?;

        reconciler.track(Arc::new(Tracked::new(
            registry.clone(),
            self.scope,
            self.config.initial_delay_ms,
        )));

        let handler = Arc::new(build(registry.clone(), dispatch));
        let dispatcher = Dispatcher::new(registry, handler, dispatch, app.clock.clone())
            .with_backoff(app.backoff.clone());

        info!(subsystem = %self.name, restored, "Subsystem enabled");
        Ok(tokio::spawn(dispatcher.run(self.shutdown)))
    }
}
