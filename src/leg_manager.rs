// ===============================
// src/leg_manager.rs
// ===============================
//
// Facade satu leg: instrument + threshold + ledger + order manager.
//
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{HitType, LegId, OrderAck, OrderId, Px, Qty, Side, Tick};
use crate::execution_state::{ExecutionState, FeeSchedule};
use crate::gateway::OrderSink;
use crate::instrument::Instrument;
use crate::order_manager::{AckOutcome, Order, OrderError, OrderManager};
use crate::thresholds::ThresholdSet;

pub struct LegManager {
    pub leg: LegId,
    pub inst: Instrument,
    pub thold: ThresholdSet,
    pub state: ExecutionState,
    pub om: OrderManager,
}

impl LegManager {
    pub fn new(leg: LegId, inst: Instrument, thold: ThresholdSet, fees: FeeSchedule, sink: Arc<dyn OrderSink>) -> Self {
        let om = OrderManager::new(leg, inst.symbol.clone(), sink);
        Self { leg, inst, thold, state: ExecutionState::with_fees(fees), om }
    }

    pub fn symbol(&self) -> &str { &self.inst.symbol }

    /// Refresh this cycle's interpolated thresholds.
    pub fn interpolate(&mut self) {
        self.state.interpolate_thresholds(&self.thold, self.inst.lot_size, self.inst.send_in_lots);
    }

    /// New order when `order_id` is None, otherwise amend that order.
    pub fn send(&mut self, side: Side, px: Px, qty: Qty, order_id: Option<OrderId>, hit: HitType) -> Result<OrderId, OrderError> {
        if qty <= 0 {
            return Err(OrderError::ZeroQty);
        }
        if px <= 0 {
            return Err(OrderError::ZeroPrice);
        }
        match order_id {
            Some(id) => self.om.send_modify(id, px, qty).map(|_| id),
            None => self.om.send_new(&mut self.state, &self.inst, side, px, qty, hit),
        }
    }

    // Shared size.
    pub fn send_bid(&mut self, px: Px, order_id: Option<OrderId>, hit: HitType) -> Result<OrderId, OrderError> {
        self.send(Side::Buy, px, self.state.sizing.size, order_id, hit)
    }

    pub fn send_ask(&mut self, px: Px, order_id: Option<OrderId>, hit: HitType) -> Result<OrderId, OrderError> {
        self.send(Side::Sell, px, self.state.sizing.size, order_id, hit)
    }

    // Per-side size.
    pub fn send_bid_split(&mut self, px: Px, order_id: Option<OrderId>, hit: HitType) -> Result<OrderId, OrderError> {
        self.send(Side::Buy, px, self.state.sizing.bid_size, order_id, hit)
    }

    pub fn send_ask_split(&mut self, px: Px, order_id: Option<OrderId>, hit: HitType) -> Result<OrderId, OrderError> {
        self.send(Side::Sell, px, self.state.sizing.ask_size, order_id, hit)
    }

    pub fn cancel(&mut self, order_id: OrderId) -> Result<(), OrderError> {
        self.om.send_cancel(&mut self.state, order_id)
    }

    pub fn cancel_force(&mut self, order_id: OrderId) -> Result<(), OrderError> {
        self.om.send_cancel_force(&mut self.state, order_id)
    }

    /// Cancel every cancellable order matching `pred`. Returns how many were sent.
    pub fn cancel_where(&mut self, pred: impl Fn(&Order) -> bool) -> usize {
        let ids: Vec<OrderId> = self
            .om
            .orders()
            .filter(|o| o.status.is_cancellable() && pred(o))
            .map(|o| o.order_id)
            .collect();
        let mut sent = 0;
        for id in ids {
            match self.cancel(id) {
                Ok(()) => sent += 1,
                Err(e) => debug!(leg = %self.leg, order_id = id, %e, "cancel skipped"),
            }
        }
        sent
    }

    pub fn cancel_all(&mut self) -> usize {
        self.cancel_where(|_| true)
    }

    /// Apply a tick; PnL is re-marked only when the touch moved.
    pub fn on_tick(&mut self, tick: &Tick) {
        self.inst.apply_tick(tick);
        self.state.ltp = self.inst.last_traded_px;
        let (bid, ask) = (self.inst.best_bid(), self.inst.best_ask());
        if bid != self.state.best_bid_last_pnl || ask != self.state.best_ask_last_pnl {
            self.state.recompute_pnl(&self.inst);
            self.state.best_bid_last_pnl = bid;
            self.state.best_ask_last_pnl = ask;
        }
    }

    pub fn on_ack(&mut self, ack: &OrderAck) -> Option<AckOutcome> {
        self.om.process_ack(&mut self.state, &self.inst, ack)
    }

    /// Replace the threshold set. Caller validates.
    pub fn reload(&mut self, thold: ThresholdSet) {
        self.thold = thold;
        self.interpolate();
    }

    /// One liquidation cycle. Returns true once the leg is flat with nothing live.
    pub fn liquidate(&mut self) -> bool {
        let pos = self.state.net_position;
        if pos == 0 && self.om.is_empty() {
            if self.state.on_exit && self.state.active {
                info!(leg = %self.leg, symbol = %self.inst.symbol, "leg flat, deactivated");
                self.state.active = false;
            }
            return true;
        }

        let tick = self.inst.tick_size;
        let (bid, ask) = (self.inst.best_bid(), self.inst.best_ask());
        let (sell_px, buy_px) = if self.state.agg_flat { (bid - tick, ask + tick) } else { (ask, bid) };

        let on_cancel = self.state.on_cancel;
        self.cancel_where(|o| match o.side {
            Side::Sell => on_cancel || pos <= 0 || sell_px < o.px,
            Side::Buy => on_cancel || pos >= 0 || buy_px > o.px,
        });
        self.state.on_cancel = false;

        if !self.om.is_empty() || pos == 0 {
            return false;
        }

        if self.state.rms_qty == 0 {
            self.state.rms_qty = pos.abs();
        }
        let qty = pos.abs().min(self.state.rms_qty);
        let (side, px) = if pos > 0 { (Side::Sell, sell_px) } else { (Side::Buy, buy_px) };
        let hit = if self.state.agg_flat { HitType::Cross } else { HitType::Standard };
        match self.send(side, px, qty, None, hit) {
            Ok(order_id) => info!(leg = %self.leg, order_id, %side, px, qty, ?hit, "liquidation order"),
            Err(e) => warn!(leg = %self.leg, %side, px, qty, %e, "liquidation order not sent"),
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AckEvent, OrderRequest};
    use crate::gateway::RecordingSink;
    use crate::instrument::book;
    use crate::thresholds::quoting_set;

    fn leg() -> (LegManager, RecordingSink) {
        let sink = RecordingSink::new();
        let inst = Instrument::new("ag2603", "SHFE", 1, 1, 1.0);
        let mut lm = LegManager::new(LegId::Leg1, inst, quoting_set(), FeeSchedule::default(), Arc::new(sink.clone()));
        lm.on_tick(&book("ag2603", &[(100, 5)], &[(101, 5)]));
        lm.interpolate();
        (lm, sink)
    }

    fn fill(lm: &mut LegManager, side: Side, px: Px, qty: Qty) {
        let id = lm.send(side, px, qty, None, HitType::Standard).unwrap();
        lm.on_ack(&OrderAck { ts_ns: 0, order_id: id, event: AckEvent::NewConfirm });
        lm.on_ack(&OrderAck { ts_ns: 0, order_id: id, event: AckEvent::Trade { px, qty } });
    }

    #[test]
    fn send_with_id_amends() {
        let (mut lm, sink) = leg();
        let id = lm.send_bid(99, None, HitType::Standard).unwrap();
        lm.on_ack(&OrderAck { ts_ns: 0, order_id: id, event: AckEvent::NewConfirm });
        assert_eq!(lm.send_bid(98, Some(id), HitType::Standard), Ok(id));
        assert!(matches!(sink.requests().last(), Some(OrderRequest::Modify { px: 98, .. })));
    }

    #[test]
    fn split_sizes_follow_side_overrides() {
        let (mut lm, sink) = leg();
        lm.reload(ThresholdSet { ask_size: Some(3), ..quoting_set() });
        lm.send_ask_split(102, None, HitType::Standard).unwrap();
        lm.send_bid_split(99, None, HitType::Standard).unwrap();
        let qtys: Vec<Qty> = sink
            .requests()
            .iter()
            .filter_map(|r| match r { OrderRequest::New { qty, .. } => Some(*qty), _ => None })
            .collect();
        assert_eq!(qtys, vec![3, 1]);
    }

    #[test]
    fn zero_size_is_refused() {
        let (mut lm, _) = leg();
        lm.reload(ThresholdSet { size: 0, ..quoting_set() });
        assert_eq!(lm.send_bid(99, None, HitType::Standard), Err(OrderError::ZeroQty));
    }

    #[test]
    fn pnl_marks_only_on_touch_change() {
        let (mut lm, _) = leg();
        fill(&mut lm, Side::Buy, 100, 2);
        lm.on_tick(&book("ag2603", &[(103, 5)], &[(104, 5)]));
        assert!((lm.state.unrealized_pnl - 6.0).abs() < 1e-9);
        // touch unchanged, deeper level changes: no re-mark needed
        lm.state.unrealized_pnl = -1.0;
        lm.on_tick(&book("ag2603", &[(103, 5), (102, 1)], &[(104, 5)]));
        assert_eq!(lm.state.unrealized_pnl, -1.0);
    }

    #[test]
    fn liquidation_cancels_then_flattens() {
        let (mut lm, sink) = leg();
        fill(&mut lm, Side::Buy, 100, 4);
        let resting = lm.send_bid(99, None, HitType::Standard).unwrap();
        lm.on_ack(&OrderAck { ts_ns: 0, order_id: resting, event: AckEvent::NewConfirm });
        sink.take();

        lm.state.on_exit = true;
        lm.state.on_cancel = true;
        assert!(!lm.liquidate());
        assert!(matches!(sink.take().as_slice(), [OrderRequest::Cancel { .. }]));

        lm.on_ack(&OrderAck { ts_ns: 0, order_id: resting, event: AckEvent::CancelConfirm });
        assert!(!lm.liquidate());
        match sink.take().as_slice() {
            [OrderRequest::New { side: Side::Sell, px: 101, qty: 4, hit: HitType::Standard, .. }] => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(lm.state.rms_qty, 4);
    }

    /// Start a liquidation on a long leg and return the confirmed flatten order.
    fn start_flatten(lm: &mut LegManager, sink: &RecordingSink, long: Qty) -> OrderId {
        fill(lm, Side::Buy, 100, long);
        sink.take();
        lm.state.on_exit = true;
        assert!(!lm.liquidate());
        let id = lm.om.orders().map(|o| o.order_id).next().unwrap();
        lm.on_ack(&OrderAck { ts_ns: 0, order_id: id, event: AckEvent::NewConfirm });
        sink.take();
        id
    }

    #[test]
    fn resend_never_exceeds_initial_flatten_size() {
        let (mut lm, sink) = leg();
        let first = start_flatten(&mut lm, &sink, 4);
        assert_eq!(lm.state.rms_qty, 4);

        // a late buy lands after liquidation started
        fill(&mut lm, Side::Buy, 100, 2);
        assert_eq!(lm.state.net_position, 6);

        // touch drops under our ask: the resting flatten order is pulled
        lm.on_tick(&book("ag2603", &[(99, 5)], &[(100, 5)]));
        sink.take();
        assert!(!lm.liquidate());
        assert!(matches!(sink.take().as_slice(), [OrderRequest::Cancel { order_id, .. }] if *order_id == first));
        lm.on_ack(&OrderAck { ts_ns: 0, order_id: first, event: AckEvent::CancelConfirm });

        assert!(!lm.liquidate());
        match sink.take().as_slice() {
            [OrderRequest::New { side: Side::Sell, px: 100, qty: 4, .. }] => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(lm.state.rms_qty, 4);
    }

    #[test]
    fn resend_after_partial_fill_uses_remaining_position() {
        let (mut lm, sink) = leg();
        let first = start_flatten(&mut lm, &sink, 4);
        lm.on_ack(&OrderAck { ts_ns: 0, order_id: first, event: AckEvent::Trade { px: 101, qty: 3 } });
        assert_eq!(lm.state.net_position, 1);

        lm.on_tick(&book("ag2603", &[(99, 5)], &[(100, 5)]));
        assert!(!lm.liquidate());
        lm.on_ack(&OrderAck { ts_ns: 0, order_id: first, event: AckEvent::CancelConfirm });
        sink.take();

        assert!(!lm.liquidate());
        match sink.take().as_slice() {
            [OrderRequest::New { side: Side::Sell, px: 100, qty: 1, .. }] => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn aggressive_flatten_crosses_one_tick() {
        let (mut lm, sink) = leg();
        fill(&mut lm, Side::Sell, 101, 2);
        sink.take();
        lm.state.agg_flat = true;
        lm.liquidate();
        assert!(matches!(
            sink.take().as_slice(),
            [OrderRequest::New { side: Side::Buy, px: 102, qty: 2, hit: HitType::Cross, .. }]
        ));
    }

    #[test]
    fn flat_leg_on_exit_deactivates() {
        let (mut lm, sink) = leg();
        lm.state.active = true;
        lm.state.on_exit = true;
        assert!(lm.liquidate());
        assert!(!lm.state.active);
        assert!(lm.liquidate());
        assert!(sink.requests().is_empty());
    }
}
