// ===============================
// src/spread_tracker.rs
// ===============================
//
// EWMA of (mid1 - mid2) with a safety band. Only ticks of the primary leg
// move the average; a leg-2 tick still gets the band check.
//
use crate::domain::Px;

#[derive(Debug, Clone)]
pub struct SpreadTracker {
    pub current: f64,
    origin: f64,
    offset: f64,
    alpha: f64,
    tick_size: f64,
    band_ticks: i64,
    seeded: bool,
    pub valid: bool,
}

impl SpreadTracker {
    pub fn new(alpha: f64, tick_size: Px, band_ticks: i64) -> Self {
        Self {
            current: 0.0,
            origin: 0.0,
            offset: 0.0,
            alpha,
            tick_size: tick_size as f64,
            band_ticks,
            seeded: false,
            valid: false,
        }
    }

    /// Start the average from a persisted value instead of the first observation.
    pub fn seed(&mut self, origin: f64) {
        self.origin = origin;
        self.seeded = true;
    }

    /// Added on top of the EWMA; history is untouched.
    pub fn set_external_offset(&mut self, v: f64) { self.offset = v; }

    pub fn external_offset(&self) -> f64 { self.offset }

    pub fn set_params(&mut self, alpha: f64, band_ticks: i64) {
        self.alpha = alpha;
        self.band_ticks = band_ticks;
    }

    /// Raw EWMA, the value that gets persisted.
    pub fn origin(&self) -> f64 { self.origin }

    /// Fair spread used for quoting.
    pub fn avg(&self) -> f64 { self.origin + self.offset }

    pub fn deviation(&self) -> f64 { (self.current - self.avg()).abs() }

    pub fn band(&self) -> f64 { self.tick_size * self.band_ticks as f64 }

    pub fn update(&mut self, mid1: f64, mid2: f64, primary: bool) -> bool {
        self.current = mid1 - mid2;
        if !self.seeded {
            self.origin = self.current;
            self.seeded = true;
        }
        if self.deviation() > self.band() {
            self.valid = false;
            return false;
        }
        if primary && self.alpha > 0.0 {
            self.origin += self.alpha * (self.current - self.origin);
        }
        self.valid = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_value_round_trips() {
        let mut s = SpreadTracker::new(0.3, 1, 20);
        s.seed(10.0);
        assert!(s.update(100.5, 90.5, true));
        assert_eq!(s.origin(), 10.0);
    }

    #[test]
    fn first_update_seeds_average() {
        let mut s = SpreadTracker::new(0.5, 1, 20);
        assert!(s.update(105.0, 100.0, false));
        assert_eq!(s.avg(), 5.0);
    }

    #[test]
    fn band_edge_is_inclusive() {
        let mut s = SpreadTracker::new(0.0, 2, 5);
        s.seed(10.0);
        // band = 2 * 5 = 10
        assert!(s.update(120.0, 100.0, true));
        assert!(!s.update(122.0, 100.0, true));
        assert!(!s.valid);
        assert_eq!(s.origin(), 10.0);
    }

    #[test]
    fn only_primary_ticks_move_the_average() {
        let mut s = SpreadTracker::new(0.5, 1, 20);
        s.seed(10.0);
        s.update(114.0, 100.0, false);
        assert_eq!(s.origin(), 10.0);
        s.update(114.0, 100.0, true);
        assert_eq!(s.origin(), 12.0);
    }

    #[test]
    fn offset_shifts_fair_value_without_touching_history() {
        let mut s = SpreadTracker::new(0.5, 1, 3);
        s.seed(10.0);
        s.set_external_offset(5.0);
        assert_eq!(s.avg(), 15.0);
        // 10 is now 5 away from fair: outside a 3-tick band
        assert!(!s.update(110.0, 100.0, true));
        assert_eq!(s.origin(), 10.0);
    }
}
