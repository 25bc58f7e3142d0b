// ===============================
// src/strategy/hedge.rs
// ===============================
//
// Hedge leg 2 against the passive fills of leg 1.
//
// exposure = leg1.passive + leg2.aggressive + pending aggressive qty on leg2
//
// Two call sites with their own cool-downs: the end of every quoting cycle
// (100 ms, one tick through the touch) and every ack while active (500 ms,
// touch first, then the retry ladder).
//
use tracing::{debug, info, warn};

use super::Core;
use crate::domain::{HitType, Px, Qty, Side};
use crate::risk::SquareoffReason;

pub(super) const QUOTE_HEDGE_COOLDOWN_MS: u64 = 100;
pub(super) const ACK_HEDGE_COOLDOWN_MS: u64 = 500;
/// Ladder steps before giving up: 1-2 tick offsets, 3 = slop, beyond = squareoff.
const MAX_RETRY_STEP: u32 = 3;

#[derive(Debug, Clone)]
pub(super) struct HedgeState {
    pub buy_agg_count: i64,
    pub sell_agg_count: i64,
    pub last_side: Option<Side>,
    pub last_ts_ms: u64,
    pub repeat: u32,
}

impl Default for HedgeState {
    fn default() -> Self {
        Self { buy_agg_count: 0, sell_agg_count: 0, last_side: None, last_ts_ms: 0, repeat: 1 }
    }
}

impl HedgeState {
    fn count(&self, side: Side) -> i64 {
        match side { Side::Buy => self.buy_agg_count, Side::Sell => self.sell_agg_count }
    }

    fn within(&self, side: Side, now_ms: u64, window_ms: u64) -> bool {
        self.last_side == Some(side) && now_ms.saturating_sub(self.last_ts_ms) <= window_ms
    }

    /// An aggressive leg-2 order reached a terminal state.
    pub fn release(&mut self, side: Side) {
        let c = match side { Side::Buy => &mut self.buy_agg_count, Side::Sell => &mut self.sell_agg_count };
        *c = (*c - 1).max(0);
    }
}

impl Core {
    pub(super) fn net_exposure(&self) -> Qty {
        self.leg1.state.passive_position + self.leg2.state.aggressive_position + self.leg2.om.pending_aggressive_qty()
    }

    /// Side to hedge on and its quantity, if the in-flight cap allows another order.
    fn hedge_need(&self) -> Option<(Side, Qty)> {
        let exposure = self.net_exposure();
        if exposure == 0 {
            return None;
        }
        let side = if exposure > 0 { Side::Sell } else { Side::Buy };
        if self.hedge.count(side) > self.leg2.thold.supporting_orders {
            debug!(%side, in_flight = self.hedge.count(side), "hedge capped");
            return None;
        }
        Some((side, exposure.abs()))
    }

    fn send_hedge(&mut self, side: Side, px: Px, qty: Qty, now_ms: u64) -> bool {
        match self.leg2.send(side, px, qty, None, HitType::Cross) {
            Ok(order_id) => {
                match side {
                    Side::Buy => self.hedge.buy_agg_count += 1,
                    Side::Sell => self.hedge.sell_agg_count += 1,
                }
                self.hedge.last_side = Some(side);
                self.hedge.last_ts_ms = now_ms;
                info!(order_id, %side, px, qty, step = self.hedge.repeat, "hedge sent");
                true
            }
            Err(e) => {
                debug!(%side, px, qty, %e, "hedge not sent");
                false
            }
        }
    }

    /// Quote-cycle hedge: one tick through the touch, 100 ms per-side cool-down.
    pub(super) fn hedge_leg2(&mut self) {
        let Some((side, qty)) = self.hedge_need() else { return };
        let now = self.clock.now_ms();
        if self.hedge.within(side, now, QUOTE_HEDGE_COOLDOWN_MS) {
            return;
        }
        let tick = self.leg2.inst.tick_size;
        let px = match side {
            Side::Sell => self.leg2.inst.best_bid() - tick,
            Side::Buy => self.leg2.inst.best_ask() + tick,
        };
        self.send_hedge(side, px, qty, now);
    }

    /// Ack-driven hedge with the retry ladder.
    pub(super) fn hedge_aggressive(&mut self) {
        let Some((side, qty)) = self.hedge_need() else { return };
        let now = self.clock.now_ms();
        let (touch, dir) = match side {
            Side::Sell => (self.leg2.inst.best_bid(), -1),
            Side::Buy => (self.leg2.inst.best_ask(), 1),
        };

        if !self.hedge.within(side, now, ACK_HEDGE_COOLDOWN_MS) {
            if self.send_hedge(side, touch, qty, now) {
                self.hedge.repeat = 1;
            }
            return;
        }

        // same side again inside the window: previous attempt did not stick
        let step = self.hedge.repeat;
        if step > MAX_RETRY_STEP {
            warn!(step, %side, qty, "hedge retries exhausted");
            self.squareoff(SquareoffReason::RetryExhausted, false);
            return;
        }
        let tick = self.leg2.inst.tick_size;
        let offset = if step < MAX_RETRY_STEP { tick * step as Px } else { tick * self.leg2.thold.slop };
        if self.send_hedge(side, touch + dir * offset, qty, now) {
            self.hedge.repeat += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{ack, books, rig, seed};
    use super::*;
    use crate::domain::{AckEvent, OrderRequest};

    fn last_new(reqs: &[OrderRequest]) -> Option<(Side, Px, Qty)> {
        reqs.iter().rev().find_map(|r| match r {
            OrderRequest::New { side, px, qty, .. } => Some((*side, *px, *qty)),
            _ => None,
        })
    }

    #[test]
    fn ladder_escalates_then_squares_off() {
        let r = rig();
        seed(&r, 10.0);
        books(&r, (&[(100, 5)], &[(101, 5)]), (&[(90, 5)], &[(91, 5)]));
        r.strat.activate();
        {
            let mut core = r.strat.lock();
            core.leg1.state.passive_position = 2;
            core.hedge_aggressive();
        }

        // every hedge dies unfilled inside the window; the cancel ack drives the next step
        let mut prices = Vec::new();
        for _ in 0..4 {
            let reqs = r.sink.take();
            let (side, px, qty) = last_new(&reqs).unwrap();
            assert_eq!((side, qty), (Side::Sell, 2));
            prices.push(px);
            r.clock.advance(50);
            ack(&r, reqs.last().map(|r| r.order_id()).unwrap(), AckEvent::CancelConfirm);
        }
        // touch, -1, -2, -slop
        assert_eq!(prices, vec![90, 89, 88, 90 - 20]);
        // nothing live on either leg, so the squareoff completes at once
        assert_eq!(r.strat.mode(), crate::strategy::Mode::Inactive);
        assert!(last_new(&r.sink.take()).is_none());
    }

    #[test]
    fn fresh_window_restarts_at_the_touch() {
        let r = rig();
        seed(&r, 10.0);
        books(&r, (&[(100, 5)], &[(101, 5)]), (&[(90, 5)], &[(91, 5)]));
        r.strat.activate();
        {
            let mut core = r.strat.lock();
            core.leg1.state.passive_position = 2;
            core.hedge.repeat = 3;
            core.hedge_aggressive();
            assert_eq!(core.hedge.repeat, 1);
        }
        let reqs = r.sink.take();
        assert_eq!(last_new(&reqs), Some((Side::Sell, 90, 2)));
        r.clock.advance(ACK_HEDGE_COOLDOWN_MS + 1);
        ack(&r, reqs[0].order_id(), AckEvent::CancelConfirm);
        assert_eq!(last_new(&r.sink.take()), Some((Side::Sell, 90, 2)));
    }

    #[test]
    fn quote_hedge_respects_cool_down() {
        let r = rig();
        seed(&r, 10.0);
        books(&r, (&[(100, 5)], &[(101, 5)]), (&[(90, 5)], &[(91, 5)]));
        let mut core = r.strat.lock();
        core.leg1.state.passive_position = -4;
        core.hedge_leg2();
        assert_eq!(last_new(&r.sink.take()), Some((Side::Buy, 92, 4)));

        // pretend the first one died; still inside 100 ms
        core.hedge.release(Side::Buy);
        core.leg2.om = crate::order_manager::OrderManager::new(
            crate::domain::LegId::Leg2,
            "ag2604",
            std::sync::Arc::new(r.sink.clone()),
        );
        r.clock.advance(QUOTE_HEDGE_COOLDOWN_MS);
        core.hedge_leg2();
        assert!(r.sink.take().is_empty());
        r.clock.advance(1);
        core.hedge_leg2();
        assert_eq!(last_new(&r.sink.take()), Some((Side::Buy, 92, 4)));
    }

    #[test]
    fn in_flight_cap_blocks_extra_hedges() {
        let r = rig();
        seed(&r, 10.0);
        books(&r, (&[(100, 5)], &[(101, 5)]), (&[(90, 5)], &[(91, 5)]));
        let mut core = r.strat.lock();
        core.hedge.sell_agg_count = 3; // cap is 2
        core.leg1.state.passive_position = 1;
        core.hedge_leg2();
        core.hedge_aggressive();
        assert!(r.sink.take().is_empty());
    }
}
