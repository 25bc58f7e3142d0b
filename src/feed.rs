// ===============================
// src/feed.rs
// ===============================
//
// Mock market data untuk dua leg yang berkorelasi:
// - leg 2 : random walk pada mid
// - leg 1 : mid leg 2 + spread yang mean-reverting di sekitar `spread_mean`
// Setiap update mengirim satu Tick per leg (leg 2 dulu), ladder `depth` level.
//
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tokio::{sync::mpsc, time::sleep};
use tracing::info;

use crate::domain::{Level, Px, Qty, Tick};
use crate::metrics::TICKS_BY_SYMBOL;

#[derive(Debug, Clone)]
pub struct MockFeedCfg {
    pub symbol1: String,
    pub symbol2: String,
    pub tick_size: Px,
    /// Starting bid of leg 2.
    pub start_px: Px,
    /// Mean of leg1 bid - leg2 bid, in ticks.
    pub spread_mean: i64,
    pub depth: usize,
    pub interval_ms: u64,
}

/// Ladder with a one-tick touch; deeper levels occasionally skip a price to leave gaps.
pub fn ladder(symbol: &str, bid: Px, tick: Px, depth: usize, rng: &mut impl Rng) -> Tick {
    let mut bids = Vec::with_capacity(depth);
    let mut asks = Vec::with_capacity(depth);
    let (mut b, mut a) = (bid, bid + tick);
    for _ in 0..depth {
        bids.push(Level { px: b, qty: rng.gen_range(1..=20) as Qty });
        asks.push(Level { px: a, qty: rng.gen_range(1..=20) as Qty });
        let gap = if rng.gen_bool(0.2) { 2 } else { 1 };
        b -= gap * tick;
        a += gap * tick;
    }
    bids.retain(|l| l.px > 0);
    Tick {
        ts_ns: Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128,
        symbol: symbol.to_string(),
        bids,
        asks,
        last_traded_px: bid,
    }
}

pub async fn run_mock(md_tx: mpsc::Sender<Tick>, cfg: MockFeedCfg) {
    info!(leg1 = %cfg.symbol1, leg2 = %cfg.symbol2, interval_ms = cfg.interval_ms, "mock feed started");
    let tick = cfg.tick_size.max(1);
    let mut px2 = cfg.start_px;
    let mut spread = cfg.spread_mean;
    loop {
        // jangan simpan ThreadRng melewati .await
        let (t2, t1) = {
            let mut rng = rand::thread_rng();
            px2 = (px2 + rng.gen_range(-2..=2) * tick).max(tick * 10);
            // tarik balik ke rata-rata, plus noise
            let pull = (cfg.spread_mean - spread).signum();
            spread += pull * i64::from(rng.gen_bool(0.3)) + rng.gen_range(-1..=1);
            let px1 = (px2 + spread * tick).max(tick);
            (ladder(&cfg.symbol2, px2, tick, cfg.depth, &mut rng), ladder(&cfg.symbol1, px1, tick, cfg.depth, &mut rng))
        };
        for t in [t2, t1] {
            TICKS_BY_SYMBOL.with_label_values(&[t.symbol.as_str()]).inc();
            if md_tx.send(t).await.is_err() {
                info!("mock feed: receiver gone, stopped");
                return;
            }
        }
        sleep(Duration::from_millis(cfg.interval_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_is_ordered_and_uncrossed() {
        let mut rng = rand::thread_rng();
        let t = ladder("ag2603", 100, 1, 5, &mut rng);
        assert_eq!(t.bids.len(), 5);
        assert_eq!(t.asks[0].px, 101);
        assert!(t.bids.windows(2).all(|w| w[0].px > w[1].px));
        assert!(t.asks.windows(2).all(|w| w[0].px < w[1].px));
        assert!(t.bids.iter().chain(&t.asks).all(|l| l.qty > 0));
    }

    #[test]
    fn ladder_drops_non_positive_bids() {
        let mut rng = rand::thread_rng();
        let t = ladder("ag2603", 2, 1, 5, &mut rng);
        assert!(t.bids.iter().all(|l| l.px > 0));
    }

    #[tokio::test]
    async fn feed_alternates_legs() {
        let (tx, mut rx) = mpsc::channel(8);
        let cfg = MockFeedCfg {
            symbol1: "ag2603".into(),
            symbol2: "ag2604".into(),
            tick_size: 1,
            start_px: 5_000,
            spread_mean: 10,
            depth: 3,
            interval_ms: 1,
        };
        let task = tokio::spawn(run_mock(tx, cfg));
        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!((a.symbol.as_str(), b.symbol.as_str()), ("ag2604", "ag2603"));
        drop(rx);
        task.await.unwrap();
    }
}
