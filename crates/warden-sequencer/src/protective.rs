//! Live protective orders of one position.

use warden_core::{OpenOrder, OrderTag, Position, PositionSide, Price};

/// Stops and targets currently protecting a position.
///
/// Built fresh from the open-order list on every cycle; never persisted.
#[derive(Debug, Clone, Default)]
pub struct ProtectiveOrderSet {
    pub stops: Vec<OpenOrder>,
    pub targets: Vec<OpenOrder>,
}

impl ProtectiveOrderSet {
    /// Reduce-only orders on the position's closing side.
    pub fn from_orders(position: &Position, orders: &[OpenOrder]) -> Self {
        let closing = position.side.closing_side();
        let mut set = Self::default();
        for order in orders {
            if order.symbol != position.symbol || order.side != closing {
                continue;
            }
            if order.is_protective_stop() {
                set.stops.push(order.clone());
            } else if order.is_protective_target() {
                set.targets.push(order.clone());
            }
        }
        set
    }

    /// The most protective live stop of any owner: highest for a long,
    /// lowest for a short.
    pub fn reference_stop(&self, side: PositionSide) -> Option<(&OpenOrder, Price)> {
        self.stops
            .iter()
            .filter_map(|o| o.effective_price().map(|p| (o, p)))
            .reduce(|best, candidate| {
                if side.is_worse_stop(best.1, candidate.1) {
                    candidate
                } else {
                    best
                }
            })
    }

    pub fn stop_price(&self, side: PositionSide) -> Option<Price> {
        self.reference_stop(side).map(|(_, p)| p)
    }

    pub fn target_prices(&self) -> Vec<Price> {
        let mut prices: Vec<_> = self
            .targets
            .iter()
            .filter_map(OpenOrder::effective_price)
            .collect();
        prices.sort();
        prices
    }

    pub fn owned_stops(&self, tag: OrderTag) -> impl Iterator<Item = &OpenOrder> {
        self.stops.iter().filter(move |o| o.owner().is_tag(tag))
    }

    pub fn owned_targets(&self, tag: OrderTag) -> impl Iterator<Item = &OpenOrder> {
        self.targets.iter().filter(move |o| o.owner().is_tag(tag))
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty() && self.targets.is_empty()
    }
}
