//! Exchange API trait.
//!
//! Every component that reads or mutates exchange state goes through
//! this trait, so the sequencer and loops can be driven by the mock in
//! tests and by the REST client in production.

use std::sync::Arc;

pub use warden_core::BoxFuture;
use warden_core::{Kline, OpenOrder, OrderRequest, PlacedOrder, Position, Price, SymbolInfo};

use crate::error::ExchangeResult;

pub trait ExchangeApi: Send + Sync {
    /// Open positions with a non-zero size.
    fn list_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<Position>>>;

    /// Open orders, for one symbol or for the whole account.
    fn list_open_orders<'a>(
        &'a self,
        symbol: Option<&'a str>,
    ) -> BoxFuture<'a, ExchangeResult<Vec<OpenOrder>>>;

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<PlacedOrder>>;

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<()>>;

    /// Tick size, step size and minimum quantity.
    fn get_symbol_info<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<SymbolInfo>>;

    fn get_mark_price<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Price>>;

    /// Most recent `limit` candles, oldest first.
    fn get_klines<'a>(
        &'a self,
        symbol: &'a str,
        interval: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<Kline>>>;
}

/// Arc wrapper for ExchangeApi trait objects.
pub type DynExchange = Arc<dyn ExchangeApi>;
