//! Order sequencer.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use warden_advisor::TargetLevel;
use warden_core::{
    ClientOrderId, OpenOrder, OrderKind, OrderOwner, OrderRequest, OrderSide, OrderTag, Position,
    PositionSide, Price, Size, SymbolInfo,
};
use warden_exchange::{DynExchange, ExchangeError};
use warden_telemetry::Metrics;

use crate::error::{SequencerError, SequencerResult};
use crate::protective::ProtectiveOrderSet;

/// Desired protection for a position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProtectionPlan {
    /// `None` leaves the stop leg alone.
    pub stop_price: Option<Price>,
    /// Empty leaves existing targets alone.
    pub targets: Vec<TargetLevel>,
}

/// What happened to the stop leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopLeg {
    /// No stop proposed; `order_id` is the live reference, if any.
    Untouched { order_id: Option<String> },
    /// Proposal equals the live stop.
    Unchanged { order_id: String, price: Price },
    /// Proposal was less protective than the live stop, which was kept.
    Kept {
        order_id: String,
        price: Price,
        rejected: Price,
    },
    Placed { order_id: String, price: Price },
    /// An open order already carried the deterministic ID.
    Adopted { order_id: String, price: Price },
}

impl StopLeg {
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::Untouched { order_id } => order_id.as_deref(),
            Self::Unchanged { order_id, .. }
            | Self::Kept { order_id, .. }
            | Self::Placed { order_id, .. }
            | Self::Adopted { order_id, .. } => Some(order_id),
        }
    }

    /// A new (or adopted) stop now supersedes older ones.
    pub fn is_replacement(&self) -> bool {
        matches!(self, Self::Placed { .. } | Self::Adopted { .. })
    }
}

/// Outcome of one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub symbol: String,
    pub tag: OrderTag,
    pub stop: StopLeg,
    pub targets_placed: Vec<String>,
    pub targets_adopted: Vec<String>,
    /// Levels dropped for size or side before placement.
    pub targets_skipped: usize,
    pub cancelled: Vec<String>,
    pub cancel_failures: Vec<String>,
    /// Market exit order, when the stop was already through the mark.
    pub exited: Option<String>,
    /// Market add-on order and its quantity.
    pub topped_up: Option<(String, Size)>,
    /// Steps that failed after earlier steps had reached the exchange.
    pub failures: Vec<String>,
}

impl SequenceReport {
    fn new(symbol: &str, tag: OrderTag) -> Self {
        Self {
            symbol: symbol.to_string(),
            tag,
            stop: StopLeg::Untouched { order_id: None },
            targets_placed: Vec::new(),
            targets_adopted: Vec::new(),
            targets_skipped: 0,
            cancelled: Vec::new(),
            cancel_failures: Vec::new(),
            exited: None,
            topped_up: None,
            failures: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty() || !self.cancel_failures.is_empty()
    }

    /// Summary of failures, for `last_error`.
    pub fn degradation_note(&self) -> Option<String> {
        if !self.is_degraded() {
            return None;
        }
        let mut parts = self.failures.clone();
        if !self.cancel_failures.is_empty() {
            parts.push(format!("cancel failed for {}", self.cancel_failures.join(",")));
        }
        Some(parts.join("; "))
    }

    /// Whether any order was placed or cancelled.
    pub fn changed_anything(&self) -> bool {
        self.stop.is_replacement()
            || !self.targets_placed.is_empty()
            || !self.cancelled.is_empty()
            || self.exited.is_some()
            || self.topped_up.is_some()
    }
}

/// Result of moving an entry order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositionReport {
    /// New price rounds to the current one.
    Unchanged { order_id: String },
    Moved {
        cancelled_order_id: String,
        new_order_id: String,
        price: Price,
    },
}

enum StopStep {
    Leave,
    Place(Price),
}

pub struct OrderSequencer {
    exchange: DynExchange,
}

impl OrderSequencer {
    pub fn new(exchange: DynExchange) -> Self {
        Self { exchange }
    }

    /// Replace stop and/or targets of `position`.
    ///
    /// `orders` must be every open order of the symbol; it is used for the
    /// monotonic guard and for adopting orders placed by an earlier,
    /// interrupted run.
    pub async fn protect(
        &self,
        tag: OrderTag,
        position: &Position,
        orders: &[OpenOrder],
        plan: &ProtectionPlan,
    ) -> SequencerResult<SequenceReport> {
        ensure_position(position)?;
        let info = self.symbol_info(&position.symbol).await?;
        let side = position.side;
        let full_size = position.size.round_to_step(info.step_size);
        let set = ProtectiveOrderSet::from_orders(position, orders);
        let reference = set.reference_stop(side);
        let mut report = SequenceReport::new(&position.symbol, tag);
        report.stop = StopLeg::Untouched {
            order_id: reference.map(|(o, _)| o.order_id.clone()),
        };

        // 1. Monotonic guard
        let step = match plan.stop_price.map(|p| p.round_to_tick(info.tick_size)) {
            None => StopStep::Leave,
            Some(proposed) => match reference {
                Some((live, current)) if side.is_worse_stop(proposed, current) => {
                    info!(
                        symbol = %position.symbol,
                        side = %side,
                        live = %current,
                        proposed = %proposed,
                        order_id = %live.order_id,
                        "Proposed stop less protective than live stop, keeping live stop"
                    );
                    Metrics::sequencer_action(&tag.to_string(), "keep");
                    report.stop = StopLeg::Kept {
                        order_id: live.order_id.clone(),
                        price: current,
                        rejected: proposed,
                    };
                    StopStep::Leave
                }
                Some((live, current)) if proposed == current && live.quantity >= full_size => {
                    debug!(symbol = %position.symbol, price = %current, "Stop unchanged");
                    report.stop = StopLeg::Unchanged {
                        order_id: live.order_id.clone(),
                        price: current,
                    };
                    StopStep::Leave
                }
                _ => StopStep::Place(proposed),
            },
        };

        // 2. Immediate exit
        if let StopStep::Place(proposed) = step {
            if side.is_stop_through_market(proposed, position.mark_price) {
                warn!(
                    symbol = %position.symbol,
                    side = %side,
                    stop = %proposed,
                    mark = %position.mark_price,
                    "Proposed stop at or through mark, exiting at market"
                );
                let order_id = self.place_exit(position, &info, orders).await?;
                report.exited = Some(order_id);
                return Ok(report);
            }
        }

        // 3. New stop
        if let StopStep::Place(price) = step {
            let request = build_request(
                tag,
                &position.symbol,
                side.closing_side(),
                OrderKind::StopMarket,
                Some(price),
                full_size,
                true,
            );
            let (order_id, adopted) = self
                .place_or_adopt(request, orders)
                .await
                .map_err(SequencerError::StopPlacement)?;
            report.stop = if adopted {
                StopLeg::Adopted { order_id, price }
            } else {
                StopLeg::Placed { order_id, price }
            };
        }

        // 4. Targets
        let mut target_ids: Vec<String> = Vec::new();
        let mut targets_failed = false;
        if !plan.targets.is_empty() {
            if report.stop.order_id().is_none() {
                warn!(symbol = %position.symbol, "No live stop, targets not placed");
                report
                    .failures
                    .push("no protective stop, targets not placed".to_string());
                return Ok(report);
            }
            for level in &plan.targets {
                let price = level.price.round_to_tick(info.tick_size);
                let quantity = (full_size * level.fraction).round_to_step(info.step_size);
                if quantity.is_zero() || quantity < info.min_qty {
                    debug!(symbol = %position.symbol, price = %price, quantity = %quantity, "Target below minimum size, skipped");
                    report.targets_skipped += 1;
                    continue;
                }
                if !is_profit_side(side, price, position.mark_price) {
                    warn!(symbol = %position.symbol, price = %price, mark = %position.mark_price, "Target on losing side of mark, skipped");
                    report.targets_skipped += 1;
                    continue;
                }
                let request = build_request(
                    tag,
                    &position.symbol,
                    side.closing_side(),
                    OrderKind::Limit,
                    Some(price),
                    quantity,
                    true,
                );
                match self.place_or_adopt(request, orders).await {
                    Ok((order_id, adopted)) => {
                        if adopted {
                            report.targets_adopted.push(order_id.clone());
                        } else {
                            report.targets_placed.push(order_id.clone());
                        }
                        target_ids.push(order_id);
                    }
                    Err(e) => {
                        warn!(symbol = %position.symbol, price = %price, error = %e, "Target placement failed, keeping new stop");
                        report.failures.push(format!("target {price} failed: {e}"));
                        targets_failed = true;
                        break;
                    }
                }
            }
        }

        // 5. Cancel superseded orders
        if targets_failed {
            return Ok(report);
        }
        let mut superseded: Vec<&OpenOrder> = Vec::new();
        if report.stop.is_replacement() {
            let keep = report.stop.order_id();
            superseded.extend(
                set.owned_stops(tag)
                    .filter(|o| Some(o.order_id.as_str()) != keep),
            );
        }
        if !target_ids.is_empty() {
            superseded.extend(
                set.owned_targets(tag)
                    .filter(|o| !target_ids.contains(&o.order_id)),
            );
        }
        self.cancel_all(tag, &superseded, &mut report).await;

        info!(
            symbol = %position.symbol,
            tag = %tag,
            stop = ?report.stop,
            targets = report.targets_placed.len(),
            cancelled = report.cancelled.len(),
            "Protection sequence complete"
        );
        Ok(report)
    }

    /// Add `size * ratio` at market, then re-size the stop to the new
    /// position size at the current stop price. Targets are not touched.
    pub async fn top_up(
        &self,
        tag: OrderTag,
        position: &Position,
        orders: &[OpenOrder],
        ratio: Decimal,
    ) -> SequencerResult<SequenceReport> {
        ensure_position(position)?;
        let info = self.symbol_info(&position.symbol).await?;
        let side = position.side;
        let add = (position.size * ratio).round_to_step(info.step_size);
        if add.is_zero() || add < info.min_qty {
            return Err(SequencerError::BelowMinimum {
                quantity: add,
                min: info.min_qty,
            });
        }

        let mut report = SequenceReport::new(&position.symbol, tag);
        let request = build_request(
            tag,
            &position.symbol,
            side.entry_side(),
            OrderKind::Market,
            None,
            add,
            false,
        );
        let placed = self
            .exchange
            .place_order(request)
            .await
            .map_err(SequencerError::TopUpPlacement)?;
        info!(symbol = %position.symbol, quantity = %add, order_id = %placed.order_id, "Position topped up");
        Metrics::sequencer_action(&tag.to_string(), "top_up");
        report.topped_up = Some((placed.order_id, add));

        let new_size = (position.size + add).round_to_step(info.step_size);
        self.resize_live_stop(tag, position, orders, new_size, &mut report)
            .await;
        Ok(report)
    }

    /// Re-size the live stop to the current position size at its current
    /// price. Used to finish a top-up whose stop resize did not go through.
    pub async fn resize_stop(
        &self,
        tag: OrderTag,
        position: &Position,
        orders: &[OpenOrder],
    ) -> SequencerResult<SequenceReport> {
        ensure_position(position)?;
        let info = self.symbol_info(&position.symbol).await?;
        let full_size = position.size.round_to_step(info.step_size);
        let mut report = SequenceReport::new(&position.symbol, tag);
        let set = ProtectiveOrderSet::from_orders(position, orders);
        if let Some((live, price)) = set.reference_stop(position.side) {
            if live.quantity >= full_size {
                debug!(symbol = %position.symbol, price = %price, "Stop already covers position");
                report.stop = StopLeg::Unchanged {
                    order_id: live.order_id.clone(),
                    price,
                };
                return Ok(report);
            }
        }
        self.resize_live_stop(tag, position, orders, full_size, &mut report)
            .await;
        Ok(report)
    }

    async fn resize_live_stop(
        &self,
        tag: OrderTag,
        position: &Position,
        orders: &[OpenOrder],
        new_size: Size,
        report: &mut SequenceReport,
    ) {
        let side = position.side;
        let set = ProtectiveOrderSet::from_orders(position, orders);
        let Some((live, price)) = set.reference_stop(side) else {
            warn!(symbol = %position.symbol, "No live stop to resize");
            report
                .failures
                .push("no live stop to resize after top-up".to_string());
            return;
        };

        // The resized stop takes over the live stop's ownership so the
        // superseded one can be cancelled.
        let owner = match live.owner() {
            OrderOwner::Ours(t) => t,
            OrderOwner::External => tag,
        };
        let request = build_request(
            owner,
            &position.symbol,
            side.closing_side(),
            OrderKind::StopMarket,
            Some(price),
            new_size,
            true,
        );
        match self.place_or_adopt(request, orders).await {
            Ok((order_id, adopted)) => {
                report.stop = if adopted {
                    StopLeg::Adopted { order_id, price }
                } else {
                    StopLeg::Placed { order_id, price }
                };
            }
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "Stop resize failed, old stop kept");
                report.failures.push(format!("stop resize failed: {e}"));
                return;
            }
        }

        let keep = report.stop.order_id().map(str::to_string);
        let superseded: Vec<&OpenOrder> = set
            .owned_stops(owner)
            .filter(|o| Some(&o.order_id) != keep.as_ref())
            .collect();
        self.cancel_all(owner, &superseded, report).await;
    }

    /// Move an entry order: cancel it, then place the same order at
    /// `new_price`. If the cancel fails nothing is placed.
    pub async fn reposition_entry(
        &self,
        order: &OpenOrder,
        new_price: Price,
        orders: &[OpenOrder],
    ) -> SequencerResult<RepositionReport> {
        let info = self.symbol_info(&order.symbol).await?;
        let price = new_price.round_to_tick(info.tick_size);
        if order.effective_price() == Some(price) {
            return Ok(RepositionReport::Unchanged {
                order_id: order.order_id.clone(),
            });
        }
        if !order.is_entry() || !order.owner().is_tag(OrderTag::EntryUpdate) {
            return Err(SequencerError::NotOwned(order.order_id.clone()));
        }

        self.exchange
            .cancel_order(&order.symbol, &order.order_id)
            .await
            .map_err(SequencerError::EntryCancel)?;
        Metrics::sequencer_action(&OrderTag::EntryUpdate.to_string(), "cancel");

        let quantity = order.quantity.round_to_step(info.step_size);
        let request = build_request(
            OrderTag::EntryUpdate,
            &order.symbol,
            order.side,
            order.kind,
            Some(price),
            quantity,
            false,
        );
        let (new_order_id, _) = self
            .place_or_adopt(request, orders)
            .await
            .map_err(|source| SequencerError::EntryPlacement {
                cancelled: order.order_id.clone(),
                source,
            })?;

        info!(
            symbol = %order.symbol,
            old_order_id = %order.order_id,
            new_order_id = %new_order_id,
            price = %price,
            "Entry order repositioned"
        );
        Ok(RepositionReport::Moved {
            cancelled_order_id: order.order_id.clone(),
            new_order_id,
            price,
        })
    }

    /// Close the whole position with a reduce-only market order.
    pub async fn exit_position(
        &self,
        position: &Position,
        orders: &[OpenOrder],
    ) -> SequencerResult<String> {
        ensure_position(position)?;
        let info = self.symbol_info(&position.symbol).await?;
        self.place_exit(position, &info, orders).await
    }

    async fn place_exit(
        &self,
        position: &Position,
        info: &SymbolInfo,
        orders: &[OpenOrder],
    ) -> SequencerResult<String> {
        let quantity = position.size.round_to_step(info.step_size);
        let request = build_request(
            OrderTag::Exit,
            &position.symbol,
            position.side.closing_side(),
            OrderKind::Market,
            None,
            quantity,
            true,
        );
        let (order_id, _) = self
            .place_or_adopt(request, orders)
            .await
            .map_err(SequencerError::ExitPlacement)?;
        info!(symbol = %position.symbol, quantity = %quantity, order_id = %order_id, "Position exited at market");
        Ok(order_id)
    }

    async fn symbol_info(&self, symbol: &str) -> SequencerResult<SymbolInfo> {
        self.exchange
            .get_symbol_info(symbol)
            .await
            .map_err(SequencerError::SymbolInfo)
    }

    /// Place `request` unless an open order already carries its client
    /// order ID. Returns the order ID and whether it was adopted.
    async fn place_or_adopt(
        &self,
        request: OrderRequest,
        orders: &[OpenOrder],
    ) -> Result<(String, bool), ExchangeError> {
        let tag = match request.client_order_id.owner() {
            OrderOwner::Ours(tag) => tag.to_string(),
            OrderOwner::External => "external".to_string(),
        };
        if let Some(existing) = orders
            .iter()
            .find(|o| o.client_order_id == request.client_order_id.as_str())
        {
            debug!(
                symbol = %request.symbol,
                client_order_id = %request.client_order_id,
                order_id = %existing.order_id,
                "Adopting existing order"
            );
            Metrics::sequencer_action(&tag, "adopt");
            return Ok((existing.order_id.clone(), true));
        }

        let action = match request.kind {
            OrderKind::StopMarket if request.reduce_only => "place_stop",
            OrderKind::Market if request.reduce_only => "exit",
            _ if request.reduce_only => "place_target",
            _ => "place_entry",
        };
        let placed = self.exchange.place_order(request).await?;
        Metrics::sequencer_action(&tag, action);
        Ok((placed.order_id, false))
    }

    async fn cancel_all(&self, tag: OrderTag, orders: &[&OpenOrder], report: &mut SequenceReport) {
        for order in orders {
            // Ownership is re-checked here so no caller can widen it.
            if !order.owner().is_tag(tag) {
                continue;
            }
            match self.exchange.cancel_order(&order.symbol, &order.order_id).await {
                Ok(()) => {
                    debug!(symbol = %order.symbol, order_id = %order.order_id, "Superseded order cancelled");
                    Metrics::sequencer_action(&tag.to_string(), "cancel");
                    report.cancelled.push(order.order_id.clone());
                }
                Err(ExchangeError::OrderNotFound { .. }) => {
                    debug!(symbol = %order.symbol, order_id = %order.order_id, "Superseded order already gone");
                }
                Err(e) => {
                    warn!(symbol = %order.symbol, order_id = %order.order_id, error = %e, "Failed to cancel superseded order");
                    Metrics::sequencer_action(&tag.to_string(), "cancel_failed");
                    report.cancel_failures.push(order.order_id.clone());
                }
            }
        }
    }
}

fn ensure_position(position: &Position) -> SequencerResult<()> {
    if !position.size.is_positive() {
        return Err(SequencerError::EmptyPosition(position.symbol.clone()));
    }
    if !position.mark_price.is_positive() {
        return Err(SequencerError::MissingMark(position.symbol.clone()));
    }
    Ok(())
}

/// Limit targets must sit beyond the mark in the profitable direction.
fn is_profit_side(side: PositionSide, price: Price, mark: Price) -> bool {
    match side {
        PositionSide::Long => price > mark,
        PositionSide::Short => price < mark,
    }
}

fn build_request(
    tag: OrderTag,
    symbol: &str,
    side: OrderSide,
    kind: OrderKind,
    price: Option<Price>,
    quantity: Size,
    reduce_only: bool,
) -> OrderRequest {
    let client_order_id = ClientOrderId::derive(tag, symbol, side, kind, price, quantity);
    let (limit_price, stop_price) = match kind {
        OrderKind::Limit => (price, None),
        OrderKind::StopMarket | OrderKind::TakeProfitMarket => (None, price),
        OrderKind::Market => (None, None),
    };
    OrderRequest {
        symbol: symbol.to_string(),
        side,
        kind,
        quantity,
        price: limit_price,
        stop_price,
        reduce_only,
        client_order_id,
    }
}
