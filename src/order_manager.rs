// ===============================
// src/order_manager.rs
// ===============================
//
// One leg's live orders. `orders` owns each Order; `bids`/`asks` map the
// order's *current* price to its id. A pending modify stays indexed at the
// old price until the venue confirms it.
//
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{AckEvent, HitType, LegId, OrderAck, OrderId, OrderRequest, OrderStatus, Px, Qty, Side};
use crate::execution_state::ExecutionState;
use crate::gateway::OrderSink;
use crate::instrument::Instrument;

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub order_id: OrderId,
    pub side: Side,
    pub px: Px,
    /// done + open
    pub qty: Qty,
    pub done_qty: Qty,
    pub open_qty: Qty,
    pub hit: HitType,
    /// Visible volume ahead of us at `px` when last observed.
    pub quant_ahead: Qty,
    pub status: OrderStatus,
    // target of an in-flight modify
    pub new_px: Px,
    pub new_qty: Qty,
}

#[derive(Debug, Error, PartialEq)]
pub enum OrderError {
    #[error("zero quantity")]
    ZeroQty,
    #[error("zero price")]
    ZeroPrice,
    #[error("{side} order already resting at {px}")]
    DuplicatePrice { side: Side, px: Px },
    #[error("unknown order {0}")]
    Unknown(OrderId),
    #[error("order {order_id} cannot be changed in status {status:?}")]
    NotCancellable { order_id: OrderId, status: OrderStatus },
}

/// What a processed ack did, for the coordinator's follow-up bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AckOutcome {
    pub order_id: OrderId,
    pub side: Side,
    pub hit: HitType,
    pub event: AckEvent,
    /// (px, qty) actually booked for a trade.
    pub fill: Option<(Px, Qty)>,
    /// Order left every index.
    pub terminal: bool,
}

pub struct OrderManager {
    leg: LegId,
    symbol: String,
    sink: Arc<dyn OrderSink>,
    orders: AHashMap<OrderId, Order>,
    bids: BTreeMap<Px, OrderId>,
    asks: BTreeMap<Px, OrderId>,
}

impl OrderManager {
    pub fn new(leg: LegId, symbol: impl Into<String>, sink: Arc<dyn OrderSink>) -> Self {
        Self {
            leg,
            symbol: symbol.into(),
            sink,
            orders: AHashMap::new(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
        }
    }

    fn index(&self, side: Side) -> &BTreeMap<Px, OrderId> {
        match side { Side::Buy => &self.bids, Side::Sell => &self.asks }
    }

    fn index_mut(&mut self, side: Side) -> &mut BTreeMap<Px, OrderId> {
        match side { Side::Buy => &mut self.bids, Side::Sell => &mut self.asks }
    }

    pub fn get(&self, order_id: OrderId) -> Option<&Order> { self.orders.get(&order_id) }

    pub fn live_count(&self) -> usize { self.orders.len() }

    pub fn is_empty(&self) -> bool { self.orders.is_empty() }

    pub fn orders(&self) -> impl Iterator<Item = &Order> { self.orders.values() }

    /// Order resting at exactly `px` on `side`, by current price.
    pub fn order_at(&self, side: Side, px: Px) -> Option<&Order> {
        self.index(side).get(&px).and_then(|id| self.orders.get(id))
    }

    /// True if `px` is taken on `side`, counting the targets of in-flight modifies.
    pub fn has_order_at(&self, side: Side, px: Px) -> bool {
        self.index(side).contains_key(&px)
            || self
                .orders
                .values()
                .any(|o| o.side == side && o.status == OrderStatus::ModifyPending && o.new_px == px)
    }

    /// Least favourable resting order: lowest bid / highest ask.
    pub fn worst(&self, side: Side) -> Option<&Order> {
        let id = match side {
            Side::Buy => self.bids.values().next(),
            Side::Sell => self.asks.values().next_back(),
        }?;
        self.orders.get(id)
    }

    pub fn aggressive_ids(&self) -> Vec<OrderId> {
        self.orders.values().filter(|o| o.hit.is_aggressive()).map(|o| o.order_id).collect()
    }

    /// Signed open quantity of live one-shot aggressive orders.
    pub fn pending_aggressive_qty(&self) -> Qty {
        self.orders
            .values()
            .filter(|o| o.hit.is_aggressive())
            .map(|o| o.side.sign() * o.open_qty)
            .sum()
    }

    pub fn send_new(
        &mut self,
        st: &mut ExecutionState,
        inst: &Instrument,
        side: Side,
        px: Px,
        qty: Qty,
        hit: HitType,
    ) -> Result<OrderId, OrderError> {
        if qty <= 0 {
            return Err(OrderError::ZeroQty);
        }
        if px <= 0 {
            return Err(OrderError::ZeroPrice);
        }
        if self.has_order_at(side, px) {
            return Err(OrderError::DuplicatePrice { side, px });
        }

        let order_id = self.sink.next_order_id();
        let quant_ahead = queue_at(inst, side, px);
        self.orders.insert(
            order_id,
            Order {
                order_id,
                side,
                px,
                qty,
                done_qty: 0,
                open_qty: qty,
                hit,
                quant_ahead,
                status: OrderStatus::New,
                new_px: 0,
                new_qty: 0,
            },
        );
        self.index_mut(side).insert(px, order_id);
        st.add_open(side, 1, qty);
        st.order_count += 1;

        debug!(leg = %self.leg, order_id, %side, px, qty, ?hit, "send new");
        self.sink.submit(OrderRequest::New {
            order_id,
            leg: self.leg,
            symbol: self.symbol.clone(),
            side,
            px,
            qty,
            hit,
        });
        Ok(order_id)
    }

    /// Amend a confirmed order. Open quantity moves only when the venue confirms.
    pub fn send_modify(&mut self, order_id: OrderId, new_px: Px, new_qty: Qty) -> Result<(), OrderError> {
        if new_qty <= 0 {
            return Err(OrderError::ZeroQty);
        }
        if new_px <= 0 {
            return Err(OrderError::ZeroPrice);
        }
        let (side, px, status) = match self.orders.get(&order_id) {
            Some(o) => (o.side, o.px, o.status),
            None => return Err(OrderError::Unknown(order_id)),
        };
        if !status.is_cancellable() {
            return Err(OrderError::NotCancellable { order_id, status });
        }
        if new_px != px && self.has_order_at(side, new_px) {
            return Err(OrderError::DuplicatePrice { side, px: new_px });
        }

        if let Some(o) = self.orders.get_mut(&order_id) {
            o.status = OrderStatus::ModifyPending;
            o.new_px = new_px;
            o.new_qty = new_qty;
        }
        debug!(leg = %self.leg, order_id, new_px, new_qty, "send modify");
        self.sink.submit(OrderRequest::Modify {
            order_id,
            leg: self.leg,
            symbol: self.symbol.clone(),
            px: new_px,
            qty: new_qty,
        });
        Ok(())
    }

    /// Cancel a confirmed order.
    pub fn send_cancel(&mut self, st: &mut ExecutionState, order_id: OrderId) -> Result<(), OrderError> {
        let status = self.orders.get(&order_id).map(|o| o.status).ok_or(OrderError::Unknown(order_id))?;
        if !status.is_cancellable() {
            return Err(OrderError::NotCancellable { order_id, status });
        }
        self.issue_cancel(st, order_id);
        Ok(())
    }

    /// Cancel regardless of confirmation state; only a cancel already in flight is refused.
    pub fn send_cancel_force(&mut self, st: &mut ExecutionState, order_id: OrderId) -> Result<(), OrderError> {
        let status = self.orders.get(&order_id).map(|o| o.status).ok_or(OrderError::Unknown(order_id))?;
        if status == OrderStatus::CancelPending {
            return Err(OrderError::NotCancellable { order_id, status });
        }
        self.issue_cancel(st, order_id);
        Ok(())
    }

    fn issue_cancel(&mut self, st: &mut ExecutionState, order_id: OrderId) {
        if let Some(o) = self.orders.get_mut(&order_id) {
            o.status = OrderStatus::CancelPending;
        }
        st.cancel_count += 1;
        debug!(leg = %self.leg, order_id, "send cancel");
        self.sink.submit(OrderRequest::Cancel { order_id, leg: self.leg, symbol: self.symbol.clone() });
    }

    fn remove(&mut self, order_id: OrderId) -> Option<Order> {
        let o = self.orders.remove(&order_id)?;
        let idx = self.index_mut(o.side);
        if idx.get(&o.px) == Some(&order_id) {
            idx.remove(&o.px);
        }
        Some(o)
    }

    /// Advance one order's lifecycle. Unknown ids are logged and dropped.
    pub fn process_ack(&mut self, st: &mut ExecutionState, inst: &Instrument, ack: &OrderAck) -> Option<AckOutcome> {
        let order_id = ack.order_id;
        let Some(o) = self.orders.get(&order_id) else {
            warn!(leg = %self.leg, order_id, event = ack.event.label(), "ack for unknown order, ignored");
            return None;
        };
        let (side, hit, status) = (o.side, o.hit, o.status);
        let mut out = AckOutcome { order_id, side, hit, event: ack.event, fill: None, terminal: false };

        match ack.event {
            AckEvent::NewConfirm => {
                let q = queue_at(inst, side, o.px);
                if let Some(o) = self.orders.get_mut(&order_id) {
                    if o.status == OrderStatus::New {
                        o.status = OrderStatus::NewConfirm;
                    }
                    o.quant_ahead = q;
                }
                st.confirm_count += 1;
                st.reject_count = 0;
            }
            AckEvent::ModifyConfirm => {
                if status != OrderStatus::ModifyPending {
                    warn!(leg = %self.leg, order_id, ?status, "modify confirm without pending modify");
                    return Some(out);
                }
                let Some(mut o) = self.remove(order_id) else { return None };
                st.add_open(side, 0, o.new_qty - o.open_qty);
                o.px = o.new_px;
                o.open_qty = o.new_qty;
                o.qty = o.done_qty + o.new_qty;
                o.new_px = 0;
                o.new_qty = 0;
                o.status = OrderStatus::ModifyConfirm;
                o.quant_ahead = queue_at(inst, side, o.px);
                self.index_mut(side).insert(o.px, order_id);
                self.orders.insert(order_id, o);
                st.confirm_count += 1;
                st.reject_count = 0;
            }
            AckEvent::ModifyReject => {
                self.revert_pending(order_id, OrderStatus::ModifyPending);
                st.reject_count += 1;
                st.total_rejects += 1;
            }
            AckEvent::CancelConfirm => {
                if let Some(o) = self.remove(order_id) {
                    st.add_open(side, -1, -o.open_qty);
                }
                st.cancel_confirm_count += 1;
                out.terminal = true;
            }
            AckEvent::CancelReject => {
                // venue refused, usually already filled upstream; the order stays live
                self.revert_pending(order_id, OrderStatus::CancelPending);
            }
            AckEvent::Trade { px, qty } => {
                let open = o.open_qty;
                let fill = qty.min(open);
                if qty > open {
                    warn!(leg = %self.leg, order_id, qty, open, "trade larger than open qty, clamped");
                }
                if fill <= 0 {
                    return Some(out);
                }
                let remaining = open - fill;
                if let Some(o) = self.orders.get_mut(&order_id) {
                    o.done_qty += fill;
                    o.open_qty = remaining;
                }
                st.add_open(side, 0, -fill);
                st.apply_fill(side, px, fill, hit, inst.price_multiplier);
                st.recompute_pnl(inst);
                info!(leg = %self.leg, order_id, %side, px, qty = fill, remaining, net = st.net_position, "trade");
                out.fill = Some((px, fill));
                if remaining == 0 {
                    self.remove(order_id);
                    st.add_open(side, -1, 0);
                    out.terminal = true;
                }
            }
            AckEvent::Reject => {
                st.reject_count += 1;
                st.total_rejects += 1;
                match status {
                    OrderStatus::ModifyPending | OrderStatus::CancelPending => {
                        self.revert_pending(order_id, status);
                    }
                    _ => {
                        if let Some(o) = self.remove(order_id) {
                            st.add_open(side, -1, -o.open_qty);
                        }
                        out.terminal = true;
                    }
                }
                warn!(leg = %self.leg, order_id, ?status, rejects = st.reject_count, "order rejected");
            }
        }
        Some(out)
    }

    fn revert_pending(&mut self, order_id: OrderId, expected: OrderStatus) {
        if let Some(o) = self.orders.get_mut(&order_id) {
            if o.status == expected {
                o.status = OrderStatus::NewConfirm;
                o.new_px = 0;
                o.new_qty = 0;
            }
        }
    }
}

fn queue_at(inst: &Instrument, side: Side, px: Px) -> Qty {
    match side {
        Side::Buy => inst.bid_qty_at(px),
        Side::Sell => inst.ask_qty_at(px),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RecordingSink;
    use crate::instrument::book;

    fn setup() -> (OrderManager, ExecutionState, Instrument, RecordingSink) {
        let sink = RecordingSink::new();
        let om = OrderManager::new(LegId::Leg1, "ag2603", Arc::new(sink.clone()));
        let mut inst = Instrument::new("ag2603", "SHFE", 1, 1, 1.0);
        inst.apply_tick(&book("ag2603", &[(100, 7), (99, 4)], &[(101, 5), (102, 9)]));
        (om, ExecutionState::default(), inst, sink)
    }

    fn ack(order_id: OrderId, event: AckEvent) -> OrderAck {
        OrderAck { ts_ns: 0, order_id, event }
    }

    fn assert_open_consistent(om: &OrderManager, st: &ExecutionState) {
        for side in [Side::Buy, Side::Sell] {
            let sum: Qty = om.orders().filter(|o| o.side == side).map(|o| o.open_qty).sum();
            let count = om.orders().filter(|o| o.side == side).count();
            assert_eq!(st.open_qty(side), sum, "{side} open qty");
            assert_eq!(st.open_orders(side), count, "{side} open orders");
        }
    }

    #[test]
    fn new_order_is_indexed_and_sent() {
        let (mut om, mut st, inst, sink) = setup();
        let id = om.send_new(&mut st, &inst, Side::Sell, 102, 3, HitType::Standard).unwrap();
        assert_eq!(om.order_at(Side::Sell, 102).map(|o| o.order_id), Some(id));
        assert_eq!(om.get(id).unwrap().quant_ahead, 9);
        assert_eq!(st.order_count, 1);
        assert_eq!(sink.requests().len(), 1);
        assert_open_consistent(&om, &st);
    }

    #[test]
    fn refuses_zero_and_duplicate_sends() {
        let (mut om, mut st, inst, sink) = setup();
        assert_eq!(om.send_new(&mut st, &inst, Side::Buy, 100, 0, HitType::Standard), Err(OrderError::ZeroQty));
        assert_eq!(om.send_new(&mut st, &inst, Side::Buy, 0, 1, HitType::Standard), Err(OrderError::ZeroPrice));
        om.send_new(&mut st, &inst, Side::Buy, 100, 1, HitType::Standard).unwrap();
        assert_eq!(
            om.send_new(&mut st, &inst, Side::Buy, 100, 1, HitType::Standard),
            Err(OrderError::DuplicatePrice { side: Side::Buy, px: 100 })
        );
        // same price on the other side is fine
        assert!(om.send_new(&mut st, &inst, Side::Sell, 100, 1, HitType::Standard).is_ok());
        assert_eq!(sink.requests().len(), 2);
    }

    #[test]
    fn partial_then_full_fill_removes_order() {
        let (mut om, mut st, inst, _) = setup();
        let id = om.send_new(&mut st, &inst, Side::Buy, 100, 5, HitType::Standard).unwrap();
        om.process_ack(&mut st, &inst, &ack(id, AckEvent::NewConfirm));

        let out = om.process_ack(&mut st, &inst, &ack(id, AckEvent::Trade { px: 100, qty: 2 })).unwrap();
        assert!(!out.terminal);
        let o = om.get(id).unwrap();
        assert_eq!(o.open_qty, o.qty - o.done_qty);
        assert_eq!(o.open_qty, 3);
        assert!(om.has_order_at(Side::Buy, 100));
        assert_open_consistent(&om, &st);

        let out = om.process_ack(&mut st, &inst, &ack(id, AckEvent::Trade { px: 100, qty: 3 })).unwrap();
        assert!(out.terminal);
        assert!(om.get(id).is_none());
        assert!(!om.has_order_at(Side::Buy, 100));
        assert_eq!(st.net_position, 5);
        assert_eq!(st.passive_position, 5);
        assert_eq!(st.trade_count, 2);
        assert_open_consistent(&om, &st);
    }

    #[test]
    fn cancel_confirm_and_cancel_reject() {
        let (mut om, mut st, inst, _) = setup();
        let a = om.send_new(&mut st, &inst, Side::Buy, 100, 1, HitType::Standard).unwrap();
        let b = om.send_new(&mut st, &inst, Side::Buy, 99, 1, HitType::Standard).unwrap();
        // unconfirmed orders cannot be plainly cancelled
        assert!(matches!(om.send_cancel(&mut st, a), Err(OrderError::NotCancellable { .. })));

        om.process_ack(&mut st, &inst, &ack(a, AckEvent::NewConfirm));
        om.process_ack(&mut st, &inst, &ack(b, AckEvent::NewConfirm));
        om.send_cancel(&mut st, a).unwrap();
        om.send_cancel(&mut st, b).unwrap();
        assert_eq!(om.get(a).unwrap().status, OrderStatus::CancelPending);

        let out = om.process_ack(&mut st, &inst, &ack(a, AckEvent::CancelConfirm)).unwrap();
        assert!(out.terminal);
        om.process_ack(&mut st, &inst, &ack(b, AckEvent::CancelReject));
        assert_eq!(om.get(b).unwrap().status, OrderStatus::NewConfirm);
        assert_eq!(st.cancel_confirm_count, 1);
        assert_open_consistent(&om, &st);
    }

    #[test]
    fn force_cancel_reaches_unconfirmed_orders_once() {
        let (mut om, mut st, inst, sink) = setup();
        let id = om.send_new(&mut st, &inst, Side::Sell, 99, 2, HitType::Cross).unwrap();
        om.send_cancel_force(&mut st, id).unwrap();
        assert!(om.send_cancel_force(&mut st, id).is_err());
        assert_eq!(sink.take().len(), 2);
    }

    #[test]
    fn modify_moves_index_on_confirm_only() {
        let (mut om, mut st, inst, _) = setup();
        let id = om.send_new(&mut st, &inst, Side::Sell, 102, 2, HitType::Standard).unwrap();
        om.process_ack(&mut st, &inst, &ack(id, AckEvent::NewConfirm));
        om.send_modify(id, 101, 4).unwrap();

        assert!(om.order_at(Side::Sell, 102).is_some());
        // target price is reserved while in flight
        assert!(om.has_order_at(Side::Sell, 101));
        assert_eq!(st.sell_open_qty, 2);

        om.process_ack(&mut st, &inst, &ack(id, AckEvent::ModifyConfirm));
        assert!(om.order_at(Side::Sell, 102).is_none());
        let o = om.order_at(Side::Sell, 101).unwrap();
        assert_eq!((o.open_qty, o.status), (4, OrderStatus::ModifyConfirm));
        assert_open_consistent(&om, &st);
    }

    #[test]
    fn modify_reject_reverts_to_confirmed() {
        let (mut om, mut st, inst, _) = setup();
        let id = om.send_new(&mut st, &inst, Side::Sell, 102, 2, HitType::Standard).unwrap();
        om.process_ack(&mut st, &inst, &ack(id, AckEvent::NewConfirm));
        om.send_modify(id, 103, 2).unwrap();
        om.process_ack(&mut st, &inst, &ack(id, AckEvent::ModifyReject));
        let o = om.get(id).unwrap();
        assert_eq!((o.px, o.status), (102, OrderStatus::NewConfirm));
        assert!(!om.has_order_at(Side::Sell, 103));
    }

    #[test]
    fn reject_removes_new_order_and_counts() {
        let (mut om, mut st, inst, _) = setup();
        let id = om.send_new(&mut st, &inst, Side::Buy, 100, 1, HitType::Standard).unwrap();
        let out = om.process_ack(&mut st, &inst, &ack(id, AckEvent::Reject)).unwrap();
        assert!(out.terminal);
        assert!(om.is_empty());
        assert_eq!((st.reject_count, st.total_rejects), (1, 1));
        assert_open_consistent(&om, &st);

        // a confirm resets the consecutive count
        let id = om.send_new(&mut st, &inst, Side::Buy, 100, 1, HitType::Standard).unwrap();
        om.process_ack(&mut st, &inst, &ack(id, AckEvent::NewConfirm));
        assert_eq!((st.reject_count, st.total_rejects), (0, 1));
    }

    #[test]
    fn reject_after_confirm_is_terminal() {
        let (mut om, mut st, inst, _) = setup();
        let id = om.send_new(&mut st, &inst, Side::Sell, 102, 3, HitType::Standard).unwrap();
        om.process_ack(&mut st, &inst, &ack(id, AckEvent::NewConfirm));
        assert_eq!(om.get(id).unwrap().status, OrderStatus::NewConfirm);

        let out = om.process_ack(&mut st, &inst, &ack(id, AckEvent::Reject)).unwrap();
        assert!(out.terminal);
        assert!(om.get(id).is_none());
        assert!(!om.has_order_at(Side::Sell, 102));
        assert_eq!((st.reject_count, st.total_rejects), (1, 1));
        assert_open_consistent(&om, &st);
    }

    #[test]
    fn unknown_ack_is_ignored() {
        let (mut om, mut st, inst, _) = setup();
        assert!(om.process_ack(&mut st, &inst, &ack(424242, AckEvent::Trade { px: 100, qty: 1 })).is_none());
        assert_eq!(st.net_position, 0);
        assert_eq!(st.trade_count, 0);
    }

    #[test]
    fn aggressive_fills_land_in_aggressive_bucket() {
        let (mut om, mut st, inst, _) = setup();
        let id = om.send_new(&mut st, &inst, Side::Sell, 99, 6, HitType::Cross).unwrap();
        assert_eq!(om.pending_aggressive_qty(), -6);
        om.process_ack(&mut st, &inst, &ack(id, AckEvent::Trade { px: 99, qty: 4 }));
        assert_eq!(om.pending_aggressive_qty(), -2);
        assert_eq!(st.aggressive_position, -4);
        assert_eq!(st.passive_position, 0);
    }

    #[test]
    fn worst_is_lowest_bid_and_highest_ask() {
        let (mut om, mut st, inst, _) = setup();
        om.send_new(&mut st, &inst, Side::Buy, 100, 1, HitType::Standard).unwrap();
        om.send_new(&mut st, &inst, Side::Buy, 98, 1, HitType::Standard).unwrap();
        om.send_new(&mut st, &inst, Side::Sell, 101, 1, HitType::Standard).unwrap();
        om.send_new(&mut st, &inst, Side::Sell, 104, 1, HitType::Standard).unwrap();
        assert_eq!(om.worst(Side::Buy).map(|o| o.px), Some(98));
        assert_eq!(om.worst(Side::Sell).map(|o| o.px), Some(104));
    }
}
