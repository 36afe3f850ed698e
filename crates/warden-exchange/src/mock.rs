//! In-memory exchange for tests.
//!
//! Holds positions, open orders, symbol precision, mark prices and
//! candles; records every call in order; fails chosen operations on
//! demand. Market orders fill immediately against the stored position.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use warden_core::{
    ClientOrderId, Kline, OpenOrder, OrderKind, OrderRequest, PlacedOrder, Position, Price,
    SymbolInfo,
};

use crate::api::{BoxFuture, ExchangeApi};
use crate::error::{ExchangeError, ExchangeResult};

/// Operation selector for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    ListPositions,
    ListOpenOrders,
    PlaceOrder,
    CancelOrder,
    SymbolInfo,
    MarkPrice,
    Klines,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeCall {
    ListPositions,
    ListOpenOrders(Option<String>),
    Place(OrderRequest),
    Cancel { symbol: String, order_id: String },
    SymbolInfo(String),
    MarkPrice(String),
    Klines { symbol: String, interval: String, limit: u32 },
}

#[derive(Default)]
struct MockState {
    positions: Vec<Position>,
    orders: Vec<OpenOrder>,
    symbols: HashMap<String, SymbolInfo>,
    marks: HashMap<String, Price>,
    klines: HashMap<String, Vec<Kline>>,
    calls: Vec<ExchangeCall>,
    fail_next: HashMap<MockOp, VecDeque<ExchangeError>>,
    fail_always: HashMap<MockOp, u16>,
}

#[derive(Default)]
pub struct MockExchange {
    state: Mutex<MockState>,
    next_order_id: AtomicU64,
    now_ms: AtomicU64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            next_order_id: AtomicU64::new(1000),
            ..Default::default()
        }
    }

    /// Timestamp stamped on orders placed from now on.
    pub fn set_now_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn set_symbol_info(&self, info: SymbolInfo) {
        self.state.lock().symbols.insert(info.symbol.clone(), info);
    }

    pub fn set_mark_price(&self, symbol: &str, price: Price) {
        self.state.lock().marks.insert(symbol.to_string(), price);
    }

    pub fn set_klines(&self, symbol: &str, klines: Vec<Kline>) {
        self.state.lock().klines.insert(symbol.to_string(), klines);
    }

    /// Insert or replace the position for its symbol.
    pub fn set_position(&self, position: Position) {
        let mut state = self.state.lock();
        state.positions.retain(|p| p.symbol != position.symbol);
        state.positions.push(position);
    }

    pub fn remove_position(&self, symbol: &str) {
        self.state.lock().positions.retain(|p| p.symbol != symbol);
    }

    /// Seed an open order directly, bypassing `place_order`.
    pub fn add_open_order(&self, order: OpenOrder) {
        self.state.lock().orders.push(order);
    }

    pub fn open_orders(&self) -> Vec<OpenOrder> {
        self.state.lock().orders.clone()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.state
            .lock()
            .positions
            .iter()
            .find(|p| p.symbol == symbol)
            .cloned()
    }

    /// Fail the next call of `op` with `error`. Queued errors are used in order.
    pub fn fail_next(&self, op: MockOp, error: ExchangeError) {
        self.state
            .lock()
            .fail_next
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail every call of `op` with an API error carrying `status`.
    pub fn fail_always(&self, op: MockOp, status: u16) {
        self.state.lock().fail_always.insert(op, status);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_next.clear();
        state.fail_always.clear();
    }

    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ExchangeCall::Place(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    /// Order IDs passed to `cancel_order`, in call order.
    pub fn cancelled(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ExchangeCall::Cancel { order_id, .. } => Some(order_id),
                _ => None,
            })
            .collect()
    }

    /// Record the call and return an injected failure if one applies.
    fn enter(&self, op: MockOp, call: ExchangeCall) -> ExchangeResult<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(err) = state.fail_next.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(&status) = state.fail_always.get(&op) {
            return Err(ExchangeError::Api {
                status,
                code: None,
                msg: format!("injected failure for {op:?}"),
            });
        }
        Ok(())
    }

    fn fill_market(state: &mut MockState, request: &OrderRequest, fill_price: Price, now_ms: u64) {
        let idx = state
            .positions
            .iter()
            .position(|p| p.symbol == request.symbol);
        match idx {
            Some(i) => {
                let position = &mut state.positions[i];
                if request.side == position.side.entry_side() {
                    position.size = position.size + request.quantity;
                } else if request.quantity >= position.size {
                    state.positions.remove(i);
                    return;
                } else {
                    position.size = position.size - request.quantity;
                }
                position.updated_at_ms = now_ms;
            }
            None if !request.reduce_only => {
                let side = match request.side {
                    warden_core::OrderSide::Buy => warden_core::PositionSide::Long,
                    warden_core::OrderSide::Sell => warden_core::PositionSide::Short,
                };
                state.positions.push(Position {
                    symbol: request.symbol.clone(),
                    side,
                    size: request.quantity,
                    entry_price: fill_price,
                    mark_price: fill_price,
                    unrealized_pnl: rust_decimal::Decimal::ZERO,
                    updated_at_ms: now_ms,
                });
            }
            None => {}
        }
    }
}

impl ExchangeApi for MockExchange {
    fn list_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<Position>>> {
        Box::pin(async move {
            self.enter(MockOp::ListPositions, ExchangeCall::ListPositions)?;
            Ok(self.state.lock().positions.clone())
        })
    }

    fn list_open_orders<'a>(
        &'a self,
        symbol: Option<&'a str>,
    ) -> BoxFuture<'a, ExchangeResult<Vec<OpenOrder>>> {
        Box::pin(async move {
            self.enter(
                MockOp::ListOpenOrders,
                ExchangeCall::ListOpenOrders(symbol.map(str::to_string)),
            )?;
            let state = self.state.lock();
            Ok(state
                .orders
                .iter()
                .filter(|o| symbol.map_or(true, |s| o.symbol == s))
                .cloned()
                .collect())
        })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<PlacedOrder>> {
        Box::pin(async move {
            self.enter(MockOp::PlaceOrder, ExchangeCall::Place(request.clone()))?;

            let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst).to_string();
            let now_ms = self.now_ms.load(Ordering::SeqCst);
            let mut state = self.state.lock();

            if request.kind == OrderKind::Market {
                let fill_price = state
                    .marks
                    .get(&request.symbol)
                    .copied()
                    .unwrap_or(Price::ZERO);
                Self::fill_market(&mut state, &request, fill_price, now_ms);
            } else {
                state.orders.push(OpenOrder {
                    symbol: request.symbol.clone(),
                    order_id: order_id.clone(),
                    client_order_id: request.client_order_id.to_string(),
                    side: request.side,
                    kind: request.kind,
                    price: request.price,
                    stop_price: request.stop_price,
                    quantity: request.quantity,
                    reduce_only: request.reduce_only,
                    created_at_ms: now_ms,
                });
            }

            Ok(PlacedOrder {
                symbol: request.symbol,
                order_id,
                client_order_id: ClientOrderId::from_string(request.client_order_id.to_string()),
            })
        })
    }

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<()>> {
        Box::pin(async move {
            self.enter(
                MockOp::CancelOrder,
                ExchangeCall::Cancel {
                    symbol: symbol.to_string(),
                    order_id: order_id.to_string(),
                },
            )?;
            let mut state = self.state.lock();
            let before = state.orders.len();
            state
                .orders
                .retain(|o| !(o.symbol == symbol && o.order_id == order_id));
            if state.orders.len() == before {
                return Err(ExchangeError::OrderNotFound {
                    symbol: symbol.to_string(),
                    order_id: order_id.to_string(),
                });
            }
            Ok(())
        })
    }

    fn get_symbol_info<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<SymbolInfo>> {
        Box::pin(async move {
            self.enter(MockOp::SymbolInfo, ExchangeCall::SymbolInfo(symbol.to_string()))?;
            self.state
                .lock()
                .symbols
                .get(symbol)
                .cloned()
                .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
        })
    }

    fn get_mark_price<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Price>> {
        Box::pin(async move {
            self.enter(MockOp::MarkPrice, ExchangeCall::MarkPrice(symbol.to_string()))?;
            self.state
                .lock()
                .marks
                .get(symbol)
                .copied()
                .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
        })
    }

    fn get_klines<'a>(
        &'a self,
        symbol: &'a str,
        interval: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<Kline>>> {
        Box::pin(async move {
            self.enter(
                MockOp::Klines,
                ExchangeCall::Klines {
                    symbol: symbol.to_string(),
                    interval: interval.to_string(),
                    limit,
                },
            )?;
            let state = self.state.lock();
            let all = state.klines.get(symbol).cloned().unwrap_or_default();
            let skip = all.len().saturating_sub(limit as usize);
            Ok(all.into_iter().skip(skip).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use warden_core::{OrderSide, OrderTag, PositionSide, Size};

    fn position() -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            size: Size::new(dec!(1)),
            entry_price: Price::new(dec!(100)),
            mark_price: Price::new(dec!(100)),
            unrealized_pnl: dec!(0),
            updated_at_ms: 0,
        }
    }

    fn request(kind: OrderKind, side: OrderSide, qty: rust_decimal::Decimal, reduce_only: bool) -> OrderRequest {
        let quantity = Size::new(qty);
        OrderRequest {
            symbol: "BTCUSDT".to_string(),
            side,
            kind,
            quantity,
            price: None,
            stop_price: Some(Price::new(dec!(95))),
            reduce_only,
            client_order_id: ClientOrderId::derive(
                OrderTag::StrategyUpdate,
                "BTCUSDT",
                side,
                kind,
                Some(Price::new(dec!(95))),
                quantity,
            ),
        }
    }

    #[tokio::test]
    async fn test_place_and_cancel_resting_order() {
        let ex = MockExchange::new();
        let placed = ex
            .place_order(request(OrderKind::StopMarket, OrderSide::Sell, dec!(1), true))
            .await
            .unwrap();
        assert_eq!(ex.open_orders().len(), 1);

        ex.cancel_order("BTCUSDT", &placed.order_id).await.unwrap();
        assert!(ex.open_orders().is_empty());
        assert_eq!(ex.cancelled(), vec![placed.order_id.clone()]);

        let again = ex.cancel_order("BTCUSDT", &placed.order_id).await;
        assert!(matches!(again, Err(ExchangeError::OrderNotFound { .. })));
    }

    #[tokio::test]
    async fn test_market_orders_fill_position() {
        let ex = MockExchange::new();
        ex.set_position(position());

        ex.place_order(request(OrderKind::Market, OrderSide::Buy, dec!(0.5), false))
            .await
            .unwrap();
        assert_eq!(ex.position("BTCUSDT").unwrap().size, Size::new(dec!(1.5)));
        assert!(ex.open_orders().is_empty());

        ex.place_order(request(OrderKind::Market, OrderSide::Sell, dec!(1.5), true))
            .await
            .unwrap();
        assert!(ex.position("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let ex = MockExchange::new();
        ex.fail_next(MockOp::PlaceOrder, ExchangeError::Timeout("slow".into()));
        let first = ex
            .place_order(request(OrderKind::StopMarket, OrderSide::Sell, dec!(1), true))
            .await;
        assert!(matches!(first, Err(ExchangeError::Timeout(_))));
        assert!(ex.open_orders().is_empty());

        ex.place_order(request(OrderKind::StopMarket, OrderSide::Sell, dec!(1), true))
            .await
            .unwrap();

        ex.fail_always(MockOp::ListPositions, 503);
        let err = ex.list_positions().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(ex.placed().len(), 2);
    }

    #[tokio::test]
    async fn test_klines_returns_tail() {
        let ex = MockExchange::new();
        let candles: Vec<Kline> = (0..10)
            .map(|i| Kline {
                open_time_ms: i * 60_000,
                high: Price::new(dec!(101)),
                low: Price::new(dec!(99)),
                close: Price::new(dec!(100)),
            })
            .collect();
        ex.set_klines("BTCUSDT", candles);
        let tail = ex.get_klines("BTCUSDT", "1h", 3).await.unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].open_time_ms, 7 * 60_000);
    }
}
