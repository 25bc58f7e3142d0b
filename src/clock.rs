// ===============================
// src/clock.rs
// ===============================
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Millisecond wall clock used by the hedge cool-down windows.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to. Replay and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self { Self { now: AtomicU64::new(start_ms) } }
    pub fn advance(&self, ms: u64) { self.now.fetch_add(ms, Ordering::SeqCst); }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 { self.now.load(Ordering::SeqCst) }
}
