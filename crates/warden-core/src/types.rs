//! Exchange-facing data types.
//!
//! Positions, open orders, symbol precision and order requests as the
//! rest of the workspace sees them, independent of any wire format.

use serde::{Deserialize, Serialize};

use crate::{ClientOrderId, OrderKind, OrderOwner, OrderSide, PositionSide, Price, Size};

/// An open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute position size.
    pub size: Size,
    pub entry_price: Price,
    pub mark_price: Price,
    pub unrealized_pnl: rust_decimal::Decimal,
    pub updated_at_ms: u64,
}

impl Position {
    /// Unrealized return relative to entry, in percent, signed by side.
    pub fn unrealized_pct(&self) -> Option<rust_decimal::Decimal> {
        if self.entry_price.is_zero() {
            return None;
        }
        let raw = (self.mark_price.inner() - self.entry_price.inner()) / self.entry_price.inner()
            * rust_decimal::Decimal::ONE_HUNDRED;
        Some(match self.side {
            PositionSide::Long => raw,
            PositionSide::Short => -raw,
        })
    }
}

/// A live order as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub symbol: String,
    pub order_id: String,
    pub client_order_id: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    /// Limit price (absent for market-style orders).
    pub price: Option<Price>,
    /// Trigger price (stop / take-profit orders).
    pub stop_price: Option<Price>,
    pub quantity: Size,
    pub reduce_only: bool,
    pub created_at_ms: u64,
}

impl OpenOrder {
    /// Price at which the order acts: trigger price if present, else limit price.
    pub fn effective_price(&self) -> Option<Price> {
        self.stop_price
            .filter(|p| p.is_positive())
            .or(self.price.filter(|p| p.is_positive()))
    }

    pub fn owner(&self) -> OrderOwner {
        OrderOwner::of(&self.client_order_id)
    }

    /// Reduce-only stop that protects against adverse moves.
    pub fn is_protective_stop(&self) -> bool {
        self.reduce_only && self.kind == OrderKind::StopMarket
    }

    /// Reduce-only order that locks in gains.
    pub fn is_protective_target(&self) -> bool {
        self.reduce_only && matches!(self.kind, OrderKind::Limit | OrderKind::TakeProfitMarket)
    }

    /// Order that opens or adds to a position.
    pub fn is_entry(&self) -> bool {
        !self.reduce_only && matches!(self.kind, OrderKind::Limit | OrderKind::StopMarket)
    }

    /// Age of the order in whole minutes.
    pub fn age_minutes(&self, now_ms: u64) -> f64 {
        now_ms.saturating_sub(self.created_at_ms) as f64 / 60_000.0
    }
}

/// Symbol precision metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub tick_size: Price,
    pub step_size: Size,
    pub min_qty: Size,
}

/// Order placement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: Size,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub reduce_only: bool,
    pub client_order_id: ClientOrderId,
}

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub symbol: String,
    pub order_id: String,
    pub client_order_id: ClientOrderId,
}

/// One OHLC candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time_ms: u64,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(kind: OrderKind, reduce_only: bool) -> OpenOrder {
        OpenOrder {
            symbol: "BTCUSDT".to_string(),
            order_id: "1".to_string(),
            client_order_id: "wdsu-abc".to_string(),
            side: OrderSide::Sell,
            kind,
            price: Some(Price::new(dec!(101))),
            stop_price: None,
            quantity: Size::new(dec!(1)),
            reduce_only,
            created_at_ms: 0,
        }
    }

    #[test]
    fn test_order_roles() {
        assert!(order(OrderKind::StopMarket, true).is_protective_stop());
        assert!(order(OrderKind::Limit, true).is_protective_target());
        assert!(order(OrderKind::Limit, false).is_entry());
        assert!(!order(OrderKind::Market, false).is_entry());
    }

    #[test]
    fn test_effective_price_prefers_trigger() {
        let mut o = order(OrderKind::StopMarket, true);
        o.price = Some(Price::ZERO);
        o.stop_price = Some(Price::new(dec!(95)));
        assert_eq!(o.effective_price(), Some(Price::new(dec!(95))));
    }

    #[test]
    fn test_age_minutes() {
        let mut o = order(OrderKind::Limit, false);
        o.created_at_ms = 1_000;
        assert_eq!(o.age_minutes(1_000 + 65 * 60_000), 65.0);
        assert_eq!(o.age_minutes(0), 0.0);
    }

    #[test]
    fn test_unrealized_pct_signed_by_side() {
        let mut pos = Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            size: Size::new(dec!(1)),
            entry_price: Price::new(dec!(100)),
            mark_price: Price::new(dec!(110)),
            unrealized_pnl: dec!(10),
            updated_at_ms: 0,
        };
        assert_eq!(pos.unrealized_pct(), Some(dec!(10)));
        pos.side = PositionSide::Short;
        assert_eq!(pos.unrealized_pct(), Some(dec!(-10)));
    }
}
