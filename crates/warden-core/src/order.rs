//! Order-related types and identifiers.
//!
//! Provides order side, position side, order kind, the ownership prefix
//! table and deterministic client order IDs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{Price, Size};

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Exchange wire representation.
    pub fn as_exchange(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Side of the order that opens or adds to this position.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Side of the order that reduces or closes this position.
    pub fn closing_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    /// Whether `candidate` gives strictly less protection than `current`.
    ///
    /// Long: a lower stop is worse. Short: a higher stop is worse.
    pub fn is_worse_stop(&self, candidate: Price, current: Price) -> bool {
        match self {
            Self::Long => candidate < current,
            Self::Short => candidate > current,
        }
    }

    /// The more protective of two stop prices.
    pub fn tighter_stop(&self, a: Price, b: Price) -> Price {
        if self.is_worse_stop(a, b) {
            b
        } else {
            a
        }
    }

    /// Whether a stop at `stop` is already at or through `mark`.
    pub fn is_stop_through_market(&self, stop: Price, mark: Price) -> bool {
        match self {
            Self::Long => stop >= mark,
            Self::Short => stop <= mark,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Order kind as understood by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Limit,
    Market,
    StopMarket,
    TakeProfitMarket,
}

impl OrderKind {
    /// Exchange wire representation.
    pub fn as_exchange(&self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
            Self::StopMarket => "STOP_MARKET",
            Self::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }

    /// Parse the exchange wire representation.
    pub fn from_exchange(s: &str) -> Option<Self> {
        match s {
            "LIMIT" => Some(Self::Limit),
            "MARKET" => Some(Self::Market),
            "STOP_MARKET" | "STOP" => Some(Self::StopMarket),
            "TAKE_PROFIT_MARKET" | "TAKE_PROFIT" => Some(Self::TakeProfitMarket),
            _ => None,
        }
    }

    /// Whether the order rests until a trigger price is crossed.
    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::StopMarket | Self::TakeProfitMarket)
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_exchange())
    }
}

/// Subsystem that owns an order.
///
/// Ownership is encoded as a client-order-id prefix because the exchange
/// offers no other metadata field. This table is the only place the
/// prefixes are defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTag {
    StrategyUpdate,
    ProfitTaker,
    TopUp,
    EntryUpdate,
    Exit,
}

const ORDER_TAG_PREFIXES: [(OrderTag, &str); 5] = [
    (OrderTag::StrategyUpdate, "wdsu-"),
    (OrderTag::ProfitTaker, "wdpt-"),
    (OrderTag::TopUp, "wdtu-"),
    (OrderTag::EntryUpdate, "wden-"),
    (OrderTag::Exit, "wdex-"),
];

impl OrderTag {
    /// Client-order-id prefix reserved for this subsystem.
    pub fn prefix(&self) -> &'static str {
        ORDER_TAG_PREFIXES
            .iter()
            .find(|(tag, _)| tag == self)
            .map(|(_, prefix)| *prefix)
            .unwrap_or("wd-")
    }

    /// Look up the owning subsystem of a client order ID.
    pub fn classify(client_order_id: &str) -> Option<Self> {
        ORDER_TAG_PREFIXES
            .iter()
            .find(|(_, prefix)| client_order_id.starts_with(prefix))
            .map(|(tag, _)| *tag)
    }
}

impl fmt::Display for OrderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StrategyUpdate => write!(f, "strategy_update"),
            Self::ProfitTaker => write!(f, "profit_taker"),
            Self::TopUp => write!(f, "top_up"),
            Self::EntryUpdate => write!(f, "entry_update"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// Ownership of a live order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderOwner {
    Ours(OrderTag),
    External,
}

impl OrderOwner {
    pub fn of(client_order_id: &str) -> Self {
        OrderTag::classify(client_order_id).map_or(Self::External, Self::Ours)
    }

    pub fn is_tag(&self, tag: OrderTag) -> bool {
        matches!(self, Self::Ours(t) if *t == tag)
    }
}

/// Client order ID.
///
/// IDs we create are derived from a SHA-256 hash of the order's defining
/// parameters, so a sequence retried after a crash produces the same ID
/// and finds the order it already placed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Derive a deterministic ID: `<tag prefix><16 hex chars>`.
    pub fn derive(
        tag: OrderTag,
        symbol: &str,
        side: OrderSide,
        kind: OrderKind,
        price: Option<Price>,
        quantity: Size,
    ) -> Self {
        let price = price.map(|p| p.canonical()).unwrap_or_default();
        let material = format!(
            "{symbol}|{}|{}|{price}|{}",
            side.as_exchange(),
            kind.as_exchange(),
            quantity.canonical()
        );
        let digest = Sha256::digest(material.as_bytes());
        Self(format!("{}{}", tag.prefix(), hex::encode(&digest[..8])))
    }

    /// Wrap an existing string (for parsing responses).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn owner(&self) -> OrderOwner {
        OrderOwner::of(&self.0)
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for ClientOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_position_side_order_sides() {
        assert_eq!(PositionSide::Long.entry_side(), OrderSide::Buy);
        assert_eq!(PositionSide::Long.closing_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.entry_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.closing_side(), OrderSide::Buy);
    }

    #[test]
    fn test_worse_stop_long() {
        let side = PositionSide::Long;
        assert!(side.is_worse_stop(Price::new(dec!(94)), Price::new(dec!(95))));
        assert!(!side.is_worse_stop(Price::new(dec!(96)), Price::new(dec!(95))));
        assert!(!side.is_worse_stop(Price::new(dec!(95)), Price::new(dec!(95))));
    }

    #[test]
    fn test_worse_stop_short() {
        let side = PositionSide::Short;
        assert!(side.is_worse_stop(Price::new(dec!(110)), Price::new(dec!(105))));
        assert!(!side.is_worse_stop(Price::new(dec!(100)), Price::new(dec!(105))));
    }

    #[test]
    fn test_tighter_stop() {
        let a = Price::new(dec!(95));
        let b = Price::new(dec!(97));
        assert_eq!(PositionSide::Long.tighter_stop(a, b), b);
        assert_eq!(PositionSide::Short.tighter_stop(a, b), a);
    }

    #[test]
    fn test_stop_through_market() {
        let mark = Price::new(dec!(100));
        assert!(PositionSide::Long.is_stop_through_market(Price::new(dec!(100)), mark));
        assert!(!PositionSide::Long.is_stop_through_market(Price::new(dec!(99)), mark));
        assert!(PositionSide::Short.is_stop_through_market(Price::new(dec!(99)), mark));
        assert!(!PositionSide::Short.is_stop_through_market(Price::new(dec!(101)), mark));
    }

    #[test]
    fn test_tag_prefix_roundtrip() {
        for (tag, _) in ORDER_TAG_PREFIXES {
            let id = format!("{}abc", tag.prefix());
            assert_eq!(OrderTag::classify(&id), Some(tag));
        }
        assert_eq!(OrderTag::classify("web_12345"), None);
    }

    #[test]
    fn test_owner_of_external() {
        assert_eq!(OrderOwner::of("android_abc"), OrderOwner::External);
        assert!(OrderOwner::of("wdsu-0011").is_tag(OrderTag::StrategyUpdate));
        assert!(!OrderOwner::of("wdsu-0011").is_tag(OrderTag::ProfitTaker));
    }

    #[test]
    fn test_client_order_id_deterministic() {
        let a = ClientOrderId::derive(
            OrderTag::StrategyUpdate,
            "BTCUSDT",
            OrderSide::Sell,
            OrderKind::StopMarket,
            Some(Price::new(dec!(95.0))),
            Size::new(dec!(0.010)),
        );
        let b = ClientOrderId::derive(
            OrderTag::StrategyUpdate,
            "BTCUSDT",
            OrderSide::Sell,
            OrderKind::StopMarket,
            Some(Price::new(dec!(95))),
            Size::new(dec!(0.01)),
        );
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("wdsu-"));
        assert_eq!(a.as_str().len(), "wdsu-".len() + 16);
    }

    #[test]
    fn test_client_order_id_varies_with_params() {
        let base = |price| {
            ClientOrderId::derive(
                OrderTag::StrategyUpdate,
                "BTCUSDT",
                OrderSide::Sell,
                OrderKind::StopMarket,
                Some(Price::new(price)),
                Size::new(dec!(1)),
            )
        };
        assert_ne!(base(dec!(95)), base(dec!(96)));
    }

    #[test]
    fn test_kind_wire_roundtrip() {
        for kind in [
            OrderKind::Limit,
            OrderKind::Market,
            OrderKind::StopMarket,
            OrderKind::TakeProfitMarket,
        ] {
            assert_eq!(OrderKind::from_exchange(kind.as_exchange()), Some(kind));
        }
    }
}
