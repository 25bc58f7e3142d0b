// ===============================
// src/execution_state.rs (per-leg ledger: position, PnL, counters, cycle thresholds)
// ===============================

use serde::{Deserialize, Serialize};

use crate::domain::{HitType, Px, Qty, Side};
use crate::instrument::Instrument;
use crate::thresholds::{LegSizing, ThresholdSet};

/// Exchange costs for one leg: proportional rate on traded value plus a flat per-contract fee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub buy_rate: f64,
    pub sell_rate: f64,
    pub buy_per_contract: f64,
    pub sell_per_contract: f64,
}

impl FeeSchedule {
    fn fee(&self, side: Side, value: f64, qty: Qty, multiplier: f64) -> f64 {
        match side {
            Side::Buy => self.buy_rate * value * multiplier + self.buy_per_contract * qty as f64,
            Side::Sell => self.sell_rate * value * multiplier + self.sell_per_contract * qty as f64,
        }
    }
}

/// Place/remove spread offsets in force for the current quoting cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteThresholds {
    pub bid_place: f64,
    pub bid_remove: f64,
    pub ask_place: f64,
    pub ask_remove: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    // Positions. passive = fills of Standard orders, aggressive = Cross/Match fills.
    pub net_position: Qty,
    pub passive_position: Qty,
    pub aggressive_position: Qty,

    // Session totals
    pub buy_total_qty: Qty,
    pub sell_total_qty: Qty,
    pub buy_total_value: f64,
    pub sell_total_value: f64,
    pub buy_avg_px: f64,
    pub sell_avg_px: f64,

    // Open cost basis, reset whenever the position returns to zero
    pub buy_qty: Qty,
    pub sell_qty: Qty,
    pub buy_value: f64,
    pub sell_value: f64,

    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub max_pnl: f64,
    pub drawdown: f64,
    pub fees: f64,
    pub fee_schedule: FeeSchedule,

    pub buy_open_orders: usize,
    pub sell_open_orders: usize,
    pub buy_open_qty: Qty,
    pub sell_open_qty: Qty,

    pub order_count: u64,
    pub trade_count: u64,
    pub cancel_count: u64,
    pub confirm_count: u64,
    pub cancel_confirm_count: u64,
    /// Rejects since the last confirm of any kind.
    pub reject_count: u64,
    pub total_rejects: u64,

    pub sizing: LegSizing,
    /// None = interpolation disabled this cycle (no usable max-position cap).
    pub quote: Option<QuoteThresholds>,

    pub active: bool,
    pub on_exit: bool,
    pub on_cancel: bool,
    pub agg_flat: bool,
    /// Liquidation size ceiling, fixed on the first liquidation cycle.
    pub rms_qty: Qty,

    pub ltp: Px,
    pub last_trade_px: Px,
    pub best_bid_last_pnl: Px,
    pub best_ask_last_pnl: Px,
}

impl ExecutionState {
    pub fn with_fees(fee_schedule: FeeSchedule) -> Self {
        Self { fee_schedule, ..Self::default() }
    }

    pub fn open_orders(&self, side: Side) -> usize {
        match side { Side::Buy => self.buy_open_orders, Side::Sell => self.sell_open_orders }
    }

    pub fn open_qty(&self, side: Side) -> Qty {
        match side { Side::Buy => self.buy_open_qty, Side::Sell => self.sell_open_qty }
    }

    pub(crate) fn add_open(&mut self, side: Side, orders: isize, qty: Qty) {
        match side {
            Side::Buy => {
                self.buy_open_orders = self.buy_open_orders.saturating_add_signed(orders);
                self.buy_open_qty += qty;
            }
            Side::Sell => {
                self.sell_open_orders = self.sell_open_orders.saturating_add_signed(orders);
                self.sell_open_qty += qty;
            }
        }
    }

    fn open_buy_avg(&self) -> f64 {
        if self.buy_qty > 0 { self.buy_value / self.buy_qty as f64 } else { 0.0 }
    }

    fn open_sell_avg(&self) -> f64 {
        if self.sell_qty > 0 { self.sell_value / self.sell_qty as f64 } else { 0.0 }
    }

    fn reset_cost_basis(&mut self) {
        self.buy_qty = 0;
        self.sell_qty = 0;
        self.buy_value = 0.0;
        self.sell_value = 0.0;
    }

    /// Book one execution into positions, totals, cost basis, fees and realized PnL.
    pub fn apply_fill(&mut self, side: Side, px: Px, qty: Qty, hit: HitType, multiplier: f64) {
        if qty <= 0 {
            return;
        }
        let signed = side.sign() * qty;
        let value = px as f64 * qty as f64;

        match side {
            Side::Buy => {
                self.buy_total_qty += qty;
                self.buy_total_value += value;
                self.buy_avg_px = self.buy_total_value / self.buy_total_qty as f64;
            }
            Side::Sell => {
                self.sell_total_qty += qty;
                self.sell_total_value += value;
                self.sell_avg_px = self.sell_total_value / self.sell_total_qty as f64;
            }
        }

        match hit {
            HitType::Standard | HitType::Improve => self.passive_position += signed,
            HitType::Cross | HitType::Match => self.aggressive_position += signed,
        }

        self.fees += self.fee_schedule.fee(side, value, qty, multiplier);
        self.trade_count += 1;
        self.last_trade_px = px;

        let prev = self.net_position;
        let next = prev + signed;

        // realize the part that closes existing exposure, against the reduced side's average cost
        if prev != 0 && prev.signum() != signed.signum() {
            let closed = qty.min(prev.abs()) as f64;
            let per_unit = if prev > 0 {
                px as f64 - self.open_buy_avg()
            } else {
                self.open_sell_avg() - px as f64
            };
            self.realized_pnl += closed * per_unit * multiplier;
        }

        match side {
            Side::Buy => {
                self.buy_qty += qty;
                self.buy_value += value;
            }
            Side::Sell => {
                self.sell_qty += qty;
                self.sell_value += value;
            }
        }

        self.net_position = next;
        if next == 0 {
            self.reset_cost_basis();
        } else if prev != 0 && prev.signum() != next.signum() {
            // flipped: the remainder opens a fresh basis at the fill price
            self.reset_cost_basis();
            let rem = next.abs();
            if next > 0 {
                self.buy_qty = rem;
                self.buy_value = px as f64 * rem as f64;
            } else {
                self.sell_qty = rem;
                self.sell_value = px as f64 * rem as f64;
            }
        }
    }

    /// Mark the open position against the opposite touch.
    pub fn recompute_pnl(&mut self, inst: &Instrument) {
        let mult = inst.price_multiplier;
        self.unrealized_pnl = if self.net_position > 0 && inst.best_bid() > 0 {
            self.net_position as f64 * (inst.best_bid() as f64 - self.open_buy_avg()) * mult
        } else if self.net_position < 0 && inst.best_ask() > 0 {
            (-self.net_position) as f64 * (self.open_sell_avg() - inst.best_ask() as f64) * mult
        } else {
            0.0
        };
        self.refresh_totals();
    }

    fn refresh_totals(&mut self) {
        self.gross_pnl = self.realized_pnl + self.unrealized_pnl;
        self.net_pnl = self.gross_pnl - self.fees;
        if self.net_pnl > self.max_pnl {
            self.max_pnl = self.net_pnl;
        }
        self.drawdown = self.net_pnl - self.max_pnl;
    }

    /// Recompute this cycle's place/remove offsets and caps from the passive position.
    ///
    /// Linear between the flat zone (passive = 0) and the long/short zones
    /// (|passive| = max_pos): a passive long widens the bid towards `long_*` and
    /// tightens the ask towards `short_*`; a passive short mirrors it.
    pub fn interpolate_thresholds(&mut self, thold: &ThresholdSet, lot_size: Qty, send_in_lots: bool) {
        self.sizing = thold.sizing(lot_size, send_in_lots);
        self.quote = None;

        let max_pos = self.sizing.max_pos;
        if max_pos <= 0 {
            return;
        }
        let ratio = self.passive_position as f64 / max_pos as f64;

        let long_place = thold.long_place - thold.begin_place;
        let short_place = thold.begin_place - thold.short_place;
        let long_remove = thold.long_remove - thold.begin_remove;
        let short_remove = thold.begin_remove - thold.short_remove;

        let q = if self.passive_position == 0 {
            QuoteThresholds {
                bid_place: thold.begin_place,
                bid_remove: thold.begin_remove,
                ask_place: thold.begin_place,
                ask_remove: thold.begin_remove,
            }
        } else if self.passive_position > 0 {
            QuoteThresholds {
                bid_place: thold.begin_place + long_place * ratio,
                bid_remove: thold.begin_remove + long_remove * ratio,
                ask_place: thold.begin_place - short_place * ratio,
                ask_remove: thold.begin_remove - short_remove * ratio,
            }
        } else {
            // ratio < 0 here
            QuoteThresholds {
                bid_place: thold.begin_place + short_place * ratio,
                bid_remove: thold.begin_remove + short_remove * ratio,
                ask_place: thold.begin_place - long_place * ratio,
                ask_remove: thold.begin_remove - long_remove * ratio,
            }
        };
        self.quote = Some(q);
    }

    pub fn clear_exit_flags(&mut self) {
        self.on_exit = false;
        self.on_cancel = false;
        self.agg_flat = false;
        self.rms_qty = 0;
    }

    pub fn is_flat(&self) -> bool { self.net_position == 0 }
}
