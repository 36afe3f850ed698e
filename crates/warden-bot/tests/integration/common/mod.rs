//! Shared fixtures: a seeded mock exchange, scripted advisor and registries.

#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use warden_advisor::{Decision, Proposal, ScriptedAdvisor};
use warden_core::{
    Clock, JitterWindow, ManualClock, OpenOrder, OrderKind, OrderSide, Position, PositionSide,
    Price, Size, SymbolInfo,
};
use warden_exchange::MockExchange;
use warden_persistence::MemoryStore;
use warden_scheduler::{DispatcherConfig, Registry};

pub const SYMBOL: &str = "ETHUSDT";
pub const T0: u64 = 1_700_000_000_000;

pub struct Harness {
    pub mock: Arc<MockExchange>,
    pub advisor: Arc<ScriptedAdvisor>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        let mock = Arc::new(MockExchange::new());
        mock.set_symbol_info(SymbolInfo {
            symbol: SYMBOL.to_string(),
            tick_size: Price::new(dec!(0.01)),
            step_size: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
        });
        mock.set_mark_price(SYMBOL, Price::new(dec!(2000)));
        Self {
            mock,
            advisor: Arc::new(ScriptedAdvisor::new()),
            clock: Arc::new(ManualClock::new(T0)),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn registry<P>(&self, name: &str) -> Arc<Registry<P>>
    where
        P: Clone + Serialize + DeserializeOwned + Send + Sync,
    {
        Arc::new(Registry::new(
            name,
            Arc::new(MemoryStore::new()),
            self.clock(),
            u64::MAX,
        ))
    }
}

pub fn dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        poll_interval_ms: 10,
        max_concurrent_decisions: 4,
        interval_ms: 60_000,
        cooldown_floor_ms: 1_000,
        error_backoff_ms: 5_000,
        task_timeout_ms: 5_000,
        jitter: JitterWindow::none(),
    }
}

pub fn long(size: Decimal, entry: Decimal) -> Position {
    Position {
        symbol: SYMBOL.to_string(),
        side: PositionSide::Long,
        size: Size::new(size),
        entry_price: Price::new(entry),
        mark_price: Price::new(dec!(2000)),
        unrealized_pnl: Decimal::ZERO,
        updated_at_ms: T0,
    }
}

pub fn stop(id: &str, client: &str, price: Decimal, quantity: Decimal) -> OpenOrder {
    OpenOrder {
        symbol: SYMBOL.to_string(),
        order_id: id.to_string(),
        client_order_id: client.to_string(),
        side: OrderSide::Sell,
        kind: OrderKind::StopMarket,
        price: None,
        stop_price: Some(Price::new(price)),
        quantity: Size::new(quantity),
        reduce_only: true,
        created_at_ms: T0,
    }
}

pub fn entry_order(id: &str, price: Decimal) -> OpenOrder {
    OpenOrder {
        symbol: SYMBOL.to_string(),
        order_id: id.to_string(),
        client_order_id: format!("wden-{id}"),
        side: OrderSide::Buy,
        kind: OrderKind::Limit,
        price: Some(Price::new(price)),
        stop_price: None,
        quantity: Size::new(dec!(0.5)),
        reduce_only: false,
        created_at_ms: T0,
    }
}

pub fn decision(proposal: Proposal) -> Decision {
    Decision {
        proposal,
        confidence: 0.9,
        rationale: "integration".to_string(),
    }
}
