// ===============================
// src/instrument.rs
// ===============================
//
// Per-symbol book view. Ladders are price ordered with the best level at
// index 0; a level whose price is 0 is treated as absent.
//
use crate::domain::{Level, Px, Qty, Tick};

pub const BOOK_DEPTH: usize = 20;

#[derive(Debug, Clone)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: String,
    pub tick_size: Px,
    pub lot_size: Qty,
    pub price_multiplier: f64,
    pub send_in_lots: bool,

    pub bids: [Level; BOOK_DEPTH],
    pub asks: [Level; BOOK_DEPTH],
    pub valid_bids: usize,
    pub valid_asks: usize,

    pub last_traded_px: Px,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>, tick_size: Px, lot_size: Qty, price_multiplier: f64) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            tick_size: tick_size.max(1),
            lot_size: lot_size.max(1),
            price_multiplier,
            send_in_lots: false,
            bids: [Level::default(); BOOK_DEPTH],
            asks: [Level::default(); BOOK_DEPTH],
            valid_bids: 0,
            valid_asks: 0,
            last_traded_px: 0,
        }
    }

    /// Copy the tick's ladders into the fixed-depth book. Levels beyond what the
    /// tick carries are cleared.
    pub fn apply_tick(&mut self, tick: &Tick) {
        fill_ladder(&mut self.bids, &tick.bids);
        fill_ladder(&mut self.asks, &tick.asks);
        self.valid_bids = count_valid(&self.bids);
        self.valid_asks = count_valid(&self.asks);
        if tick.last_traded_px > 0 {
            self.last_traded_px = tick.last_traded_px;
        }
    }

    pub fn best_bid(&self) -> Px { self.bids[0].px }
    pub fn best_ask(&self) -> Px { self.asks[0].px }

    pub fn has_valid_book(&self) -> bool { self.best_bid() > 0 && self.best_ask() > 0 }

    pub fn has_levels(&self) -> bool { self.valid_bids > 0 && self.valid_asks > 0 }

    pub fn mid_price(&self) -> f64 { (self.best_bid() + self.best_ask()) as f64 / 2.0 }

    /// Visible size at `px` on the bid ladder, 0 if the price is not shown.
    pub fn bid_qty_at(&self, px: Px) -> Qty {
        self.bids[..self.valid_bids].iter().find(|l| l.px == px).map(|l| l.qty).unwrap_or(0)
    }

    pub fn ask_qty_at(&self, px: Px) -> Qty {
        self.asks[..self.valid_asks].iter().find(|l| l.px == px).map(|l| l.qty).unwrap_or(0)
    }
}

fn fill_ladder(dst: &mut [Level; BOOK_DEPTH], src: &[Level]) {
    for (i, slot) in dst.iter_mut().enumerate() {
        *slot = src.get(i).copied().unwrap_or_default();
    }
}

fn count_valid(ladder: &[Level; BOOK_DEPTH]) -> usize {
    ladder.iter().take_while(|l| l.px > 0).count()
}

#[cfg(test)]
pub(crate) fn book(symbol: &str, bids: &[(Px, Qty)], asks: &[(Px, Qty)]) -> Tick {
    Tick {
        ts_ns: 0,
        symbol: symbol.to_string(),
        bids: bids.iter().map(|&(px, qty)| Level { px, qty }).collect(),
        asks: asks.iter().map(|&(px, qty)| Level { px, qty }).collect(),
        last_traded_px: 0,
    }
}
