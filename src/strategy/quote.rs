// ===============================
// src/strategy/quote.rs
// ===============================
use tracing::debug;

use super::Core;
use crate::domain::{HitType, Px, Side};
use crate::execution_state::QuoteThresholds;
use crate::instrument::BOOK_DEPTH;

impl Core {
    /// One quoting cycle on leg 1, ending with the leg-2 hedge.
    pub(super) fn quote(&mut self) {
        self.leg1.interpolate();
        let Some(q) = self.leg1.state.quote else {
            debug!("quoting disabled: no usable max position");
            return;
        };

        // one-shot orders never carry over to the next cycle
        for lm in [&mut self.leg1, &mut self.leg2] {
            for id in lm.om.aggressive_ids() {
                if let Err(e) = lm.cancel_force(id) {
                    debug!(leg = %lm.leg, order_id = id, %e, "leftover aggressive order not cancelled");
                }
            }
        }

        let avg = self.spread.avg();
        self.cancel_out_of_range(avg, &q);

        if !(self.leg1.inst.has_valid_book() && self.leg2.inst.has_valid_book()) {
            return;
        }

        let levels = self
            .params
            .max_quote_level
            .unwrap_or(self.leg1.thold.max_quote_level)
            .min(BOOK_DEPTH);
        let (l2_bid, l2_ask) = (self.leg2.inst.best_bid(), self.leg2.inst.best_ask());

        for level in 0..levels {
            let (bid, ask) = (self.leg1.inst.bids[level].px, self.leg1.inst.asks[level].px);
            if bid == 0 || ask == 0 {
                break;
            }
            let long_spread = (bid - l2_bid) as f64;
            let short_spread = (ask - l2_ask) as f64;

            if short_spread > avg + q.ask_place {
                let (px, hit) = self.improve_ask(ask, level, avg, q.ask_place);
                self.place(Side::Sell, px, hit);
            }
            if long_spread < avg - q.bid_place {
                let (px, hit) = self.improve_bid(bid, level, avg, q.bid_place);
                self.place(Side::Buy, px, hit);
            }
        }

        self.hedge_leg2();
    }

    /// Pull leg-1 quotes whose spread against the leg-2 touch fell inside the remove threshold.
    fn cancel_out_of_range(&mut self, avg: f64, q: &QuoteThresholds) {
        let (l2_bid, l2_ask) = (self.leg2.inst.best_bid(), self.leg2.inst.best_ask());
        let n = self.leg1.cancel_where(|o| {
            !o.hit.is_aggressive()
                && match o.side {
                    Side::Buy => (o.px - l2_bid) as f64 > avg - q.bid_remove,
                    Side::Sell => ((o.px - l2_ask) as f64) < avg + q.ask_remove,
                }
        });
        if n > 0 {
            debug!(cancelled = n, avg, "quotes out of range");
        }
    }

    // Skip the queue: step one tick inside a ladder gap when our order at this
    // level is stuck behind more than a lot and the spread still clears.
    fn improve_ask(&self, px: Px, level: usize, avg: f64, place: f64) -> (Px, HitType) {
        if !self.params.use_invisible_book || level == 0 {
            return (px, HitType::Standard);
        }
        let inst = &self.leg1.inst;
        let tick = inst.tick_size;
        if px <= inst.asks[level - 1].px + tick {
            return (px, HitType::Standard);
        }
        let better = px - tick;
        let clears = (better - self.leg2.inst.best_ask()) as f64 > avg + place;
        let queued = self.leg1.om.order_at(Side::Sell, px).is_some_and(|o| o.quant_ahead > inst.lot_size);
        if clears && queued { (better, HitType::Improve) } else { (px, HitType::Standard) }
    }

    fn improve_bid(&self, px: Px, level: usize, avg: f64, place: f64) -> (Px, HitType) {
        if !self.params.use_invisible_book || level == 0 {
            return (px, HitType::Standard);
        }
        let inst = &self.leg1.inst;
        let tick = inst.tick_size;
        if px >= inst.bids[level - 1].px - tick {
            return (px, HitType::Standard);
        }
        let better = px + tick;
        let clears = ((better - self.leg2.inst.best_bid()) as f64) < avg - place;
        let queued = self.leg1.om.order_at(Side::Buy, px).is_some_and(|o| o.quant_ahead > inst.lot_size);
        if clears && queued { (better, HitType::Improve) } else { (px, HitType::Standard) }
    }

    /// Position and order-count gate for one candidate quote.
    fn place(&mut self, side: Side, px: Px, hit: HitType) {
        let st = &self.leg1.state;
        let exposure = side.sign() * st.passive_position;
        let cap = match side {
            Side::Buy => st.sizing.bid_max_pos,
            Side::Sell => st.sizing.ask_max_pos,
        };
        if cap <= 0 {
            return;
        }
        if exposure >= cap {
            let n = self.leg1.cancel_where(|o| o.side == side);
            debug!(%side, exposure, cap, cancelled = n, "side at cap");
            return;
        }

        let crowded = st.open_orders(side) as i64 > self.leg1.thold.supporting_orders;
        if crowded || st.open_qty(side) + exposure >= cap {
            self.cancel_worst_if_better(side, px);
            return;
        }

        let res = match side {
            Side::Buy => self.leg1.send_bid_split(px, None, hit),
            Side::Sell => self.leg1.send_ask_split(px, None, hit),
        };
        if let Err(e) = res {
            debug!(%side, px, %e, "quote not sent");
        }
    }

    fn cancel_worst_if_better(&mut self, side: Side, px: Px) {
        let Some(worst) = self.leg1.om.worst(side) else { return };
        let better = match side {
            Side::Buy => px > worst.px,
            Side::Sell => px < worst.px,
        };
        if !better || self.leg1.om.has_order_at(side, px) {
            return;
        }
        let id = worst.order_id;
        if let Err(e) = self.leg1.cancel(id) {
            debug!(order_id = id, %e, "worst quote not cancelled");
        }
    }
}
