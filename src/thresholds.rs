// ===============================
// src/thresholds.rs
// ===============================
//
// Per-leg threshold set. Loaded from JSON, replaced as a whole on reload.
//
// Place/remove offsets are spread distances (price units) for three
// inventory zones: flat (begin_*), long (long_*), short (short_*).
// Sizes are in lots unless the leg sends in units (send_in_lots = false
// multiplies by the lot size).
//
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::domain::Qty;

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("place zones out of order: long {long} >= begin {begin} >= short {short} required")]
    PlaceOrdering { long: f64, begin: f64, short: f64 },
    #[error("remove zones out of order: long {long} >= begin {begin} >= short {short} required")]
    RemoveOrdering { long: f64, begin: f64, short: f64 },
    #[error("decay factor {0} outside [0, 1]")]
    Decay(f64),
    #[error("non-finite threshold value for {0}")]
    NonFinite(&'static str),
    #[error("{name} must not be negative, got {value}")]
    Negative { name: &'static str, value: i64 },
}

#[derive(Debug, Error)]
pub enum ThresholdLoadError {
    #[error("read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("parse {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error(transparent)]
    Invalid(#[from] ThresholdError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSet {
    pub begin_place: f64,
    pub begin_remove: f64,
    pub long_place: f64,
    pub long_remove: f64,
    pub short_place: f64,
    pub short_remove: f64,

    pub size: Qty,
    pub max_size: Qty,
    // Independent bid/ask overrides. None = use the shared value.
    pub bid_size: Option<Qty>,
    pub ask_size: Option<Qty>,
    pub bid_max_size: Option<Qty>,
    pub ask_max_size: Option<Qty>,

    pub supporting_orders: i64,
    pub slop: i64,
    pub alpha: f64,
    pub avg_spread_away: i64,
    pub max_quote_level: usize,
    pub max_loss: Option<f64>,

    pub max_order_count: Option<u64>,
    pub max_traded_qty: Option<Qty>,
    pub band_breach_limit: u32,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            begin_place: 0.0,
            begin_remove: 0.0,
            long_place: 0.0,
            long_remove: 0.0,
            short_place: 0.0,
            short_remove: 0.0,
            size: 0,
            max_size: 0,
            bid_size: None,
            ask_size: None,
            bid_max_size: None,
            ask_max_size: None,
            supporting_orders: 0,
            slop: 20,
            alpha: 0.0,
            avg_spread_away: 20,
            max_quote_level: 3,
            max_loss: None,
            max_order_count: None,
            max_traded_qty: None,
            band_breach_limit: 1,
        }
    }
}

/// Order sizes and position caps in units, derived from a threshold set for one leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegSizing {
    pub size: Qty,
    pub max_pos: Qty,
    pub bid_size: Qty,
    pub ask_size: Qty,
    pub bid_max_pos: Qty,
    pub ask_max_pos: Qty,
}

impl ThresholdSet {
    pub fn validate(&self) -> Result<(), ThresholdError> {
        for (name, v) in [
            ("begin_place", self.begin_place),
            ("begin_remove", self.begin_remove),
            ("long_place", self.long_place),
            ("long_remove", self.long_remove),
            ("short_place", self.short_place),
            ("short_remove", self.short_remove),
            ("alpha", self.alpha),
        ] {
            if !v.is_finite() {
                return Err(ThresholdError::NonFinite(name));
            }
        }
        if !(self.long_place >= self.begin_place && self.begin_place >= self.short_place) {
            return Err(ThresholdError::PlaceOrdering {
                long: self.long_place,
                begin: self.begin_place,
                short: self.short_place,
            });
        }
        if !(self.long_remove >= self.begin_remove && self.begin_remove >= self.short_remove) {
            return Err(ThresholdError::RemoveOrdering {
                long: self.long_remove,
                begin: self.begin_remove,
                short: self.short_remove,
            });
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ThresholdError::Decay(self.alpha));
        }
        for (name, value) in [
            ("avg_spread_away", self.avg_spread_away),
            ("slop", self.slop),
            ("supporting_orders", self.supporting_orders),
        ] {
            if value < 0 {
                return Err(ThresholdError::Negative { name, value });
            }
        }
        Ok(())
    }

    pub fn sizing(&self, lot_size: Qty, send_in_lots: bool) -> LegSizing {
        let unit = if send_in_lots { 1 } else { lot_size.max(1) };
        let size = self.size * unit;
        let max_pos = self.max_size * unit;
        let bid_max_pos = self.bid_max_size.map(|v| v * unit).unwrap_or(max_pos);
        let ask_max_pos = self.ask_max_size.map(|v| v * unit).unwrap_or(max_pos);
        LegSizing {
            size,
            // interpolation span covers the wider side when split
            max_pos: bid_max_pos.max(ask_max_pos),
            bid_size: self.bid_size.map(|v| v * unit).unwrap_or(size),
            ask_size: self.ask_size.map(|v| v * unit).unwrap_or(size),
            bid_max_pos,
            ask_max_pos,
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Read + validate a JSON threshold file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ThresholdLoadError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ThresholdLoadError::Io { path: shown.clone(), source })?;
        let set = Self::from_json_str(&text)
            .map_err(|source| ThresholdLoadError::Parse { path: shown, source })?;
        set.validate()?;
        Ok(set)
    }
}

#[cfg(test)]
pub(crate) fn quoting_set() -> ThresholdSet {
    ThresholdSet {
        begin_place: 2.0,
        begin_remove: 1.0,
        long_place: 3.0,
        long_remove: 1.5,
        short_place: 1.5,
        short_remove: 0.5,
        size: 1,
        max_size: 5,
        supporting_orders: 2,
        ..ThresholdSet::default()
    }
}
