//! End-to-end cycles: reconciler, dispatcher, handler, sequencer and mock exchange.

mod integration;
use integration::common::{decision, dispatcher_config, entry_order, long, stop, Harness, SYMBOL};

use std::sync::Arc;

use rust_decimal_macros::dec;
use warden_advisor::Proposal;
use warden_bot::config::ReconcileSection;
use warden_bot::reconcile::{Reconciler, TrackScope, Tracked};
use warden_bot::subsystems::{
    EntryPayload, EntryUpdateHandler, HealthHandler, HealthPayload, StrategyPayload,
    StrategyUpdateHandler, SubsystemContext,
};
use warden_core::{Clock, OrderKind, Price};
use warden_exchange::MockOp;
use warden_scheduler::{Dispatcher, EntryKey, EntryStatus};

fn reconcile_config() -> ReconcileSection {
    ReconcileSection {
        interval_ms: 1_000,
        initial_delay_ms: 0,
    }
}

#[tokio::test]
async fn test_reconciled_position_gets_stop_trailed() {
    let h = Harness::new();
    h.mock.set_position(long(dec!(2), dec!(1900)));
    h.mock.add_open_order(stop("11", "wdsu-seed", dec!(1850), dec!(2)));
    h.advisor.push(
        SYMBOL,
        Ok(decision(Proposal::Adjust {
            stop_price: Some(Price::new(dec!(1920.004))),
            targets: Vec::new(),
            entry_price: None,
        })),
    );

    let registry = h.registry::<StrategyPayload>("strategy_update");
    let mut reconciler = Reconciler::new(h.mock.clone(), reconcile_config());
    reconciler.track(Arc::new(Tracked::new(registry.clone(), TrackScope::Position, 0)));
    assert_eq!(reconciler.run_once().await.unwrap().scheduled, 1);

    let ctx = SubsystemContext::new(h.mock.clone(), h.advisor.clone());
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(StrategyUpdateHandler::new(ctx)),
        dispatcher_config(),
        h.clock(),
    );
    let report = dispatcher.process_due_entries().await;
    assert_eq!(report.claimed, 1);
    assert_eq!(report.rescheduled, 1);

    let placed = h.mock.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].kind, OrderKind::StopMarket);
    assert_eq!(placed[0].stop_price, Some(Price::new(dec!(1920))));
    assert!(placed[0].reduce_only);
    assert_eq!(h.mock.cancelled(), vec!["11".to_string()]);

    let entry = registry.get(&EntryKey::position(SYMBOL)).unwrap();
    assert_eq!(entry.status, EntryStatus::Waiting);
    assert_eq!(entry.cycle_index, 1);
    assert_eq!(entry.payload, StrategyPayload { adjustments: 1 });
    assert_eq!(entry.trigger_at_ms, h.clock.now_ms() + 60_000);
}

#[tokio::test]
async fn test_failed_stop_placement_keeps_old_stop() {
    let h = Harness::new();
    h.mock.set_position(long(dec!(2), dec!(1900)));
    h.mock.add_open_order(stop("11", "wdsu-seed", dec!(1850), dec!(2)));
    h.mock.fail_always(MockOp::PlaceOrder, 503);
    h.advisor.push(
        SYMBOL,
        Ok(decision(Proposal::Adjust {
            stop_price: Some(Price::new(dec!(1920))),
            targets: Vec::new(),
            entry_price: None,
        })),
    );

    let registry = h.registry::<StrategyPayload>("strategy_update");
    registry.schedule(EntryKey::position(SYMBOL), StrategyPayload::default(), 0);
    let ctx = SubsystemContext::new(h.mock.clone(), h.advisor.clone());
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(StrategyUpdateHandler::new(ctx)),
        dispatcher_config(),
        h.clock(),
    );

    let report = dispatcher.process_due_entries().await;
    assert_eq!(report.failed, 1);
    assert!(h.mock.cancelled().is_empty());
    assert_eq!(h.mock.open_orders().len(), 1);

    let entry = registry.get(&EntryKey::position(SYMBOL)).unwrap();
    assert!(entry.last_error.is_some());
    assert_eq!(entry.trigger_at_ms, h.clock.now_ms() + 5_000);
}

#[tokio::test]
async fn test_health_entry_follows_position_lifecycle() {
    let h = Harness::new();
    h.mock.set_position(long(dec!(1), dec!(2000)));
    let registry = h.registry::<HealthPayload>("health");
    let mut reconciler = Reconciler::new(h.mock.clone(), reconcile_config());
    reconciler.track(Arc::new(Tracked::new(registry.clone(), TrackScope::Position, 0)));
    reconciler.run_once().await.unwrap();

    let ctx = SubsystemContext::new(h.mock.clone(), h.advisor.clone());
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(HealthHandler::new(ctx)),
        dispatcher_config(),
        h.clock(),
    );
    dispatcher.process_due_entries().await;
    let entry = registry.get(&EntryKey::position(SYMBOL)).unwrap();
    // Flat PnL and no stop.
    assert_eq!(entry.payload.last_score, Some(30.0));
    assert!(h.advisor.requests().is_empty());

    h.mock.remove_position(SYMBOL);
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.completed, 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_entry_reposition_moves_tracking_to_new_order() {
    let h = Harness::new();
    h.mock.add_open_order(entry_order("21", dec!(1950)));
    h.advisor.push(
        SYMBOL,
        Ok(decision(Proposal::Adjust {
            stop_price: None,
            targets: Vec::new(),
            entry_price: Some(Price::new(dec!(1960))),
        })),
    );

    let registry = h.registry::<EntryPayload>("entry_update");
    let mut reconciler = Reconciler::new(h.mock.clone(), reconcile_config());
    reconciler.track(Arc::new(Tracked::new(registry.clone(), TrackScope::EntryOrder, 0)));
    reconciler.run_once().await.unwrap();
    assert!(registry.contains(&EntryKey::order(SYMBOL, "21")));

    let ctx = SubsystemContext::new(h.mock.clone(), h.advisor.clone());
    let handler = EntryUpdateHandler::new(ctx, registry.clone(), dispatcher_config());
    let dispatcher = Dispatcher::new(
        registry.clone(),
        Arc::new(handler),
        dispatcher_config(),
        h.clock(),
    );
    let report = dispatcher.process_due_entries().await;
    assert_eq!(report.completed, 1);

    let placed = h.mock.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].price, Some(Price::new(dec!(1960))));
    assert!(!placed[0].reduce_only);

    let keys = registry.keys();
    assert_eq!(keys.len(), 1);
    let new_key = &keys[0];
    assert_ne!(new_key, &EntryKey::order(SYMBOL, "21"));
    assert_eq!(registry.get(new_key).unwrap().payload.repositions, 1);

    // Reconciler agrees with the handler's bookkeeping.
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.scheduled, 0);
    assert_eq!(report.completed, 0);
}
