// ===============================
// src/main.rs
// ===============================
/*
 # jalankan dengan mock feed + mock venue
 RUST_LOG=info AUTO_ACTIVATE=1 cargo run

 # perintah operator via stdin
 activate | deactivate | liquidate [agg] | offset <v> | reload <1|2> <file> | status

 # metrics
 curl -s localhost:9898/metrics | egrep '^(spread_|leg_position|strategy_mode|hedge_retry_step)'
*/
/*
=============================================================================
Project : pair_arb_bot - two-leg futures spread arbitrage engine in Rust
Module  : main.rs
Version : 0.5.0
License : MIT (see LICENSE)

Summary : Quotes the primary leg passively around an EWMA spread, hedges
          passive fills aggressively on the secondary leg with a retry
          ladder, liquidates on risk breaches, persists positions across
          restarts, exposes Prometheus metrics, and records JSONL events.
=============================================================================
*/
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    select,
    sync::mpsc,
    time::{interval, sleep, Duration, MissedTickBehavior},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pair_arb_bot::{
    clock::SystemClock,
    config::{self, Config, LegConfig},
    control::{self, ControlCommand},
    domain::{Event, LegId, OrderAck, Tick},
    feed::{self, MockFeedCfg},
    gateway::{self, ChannelSink, OrderSink},
    instrument::Instrument,
    leg_manager::LegManager,
    metrics::{self, MetricsObserver},
    recorder, snapshot,
    strategy::{self, PairwiseArbStrategy, StrategyParams},
};

fn build_leg(leg: LegId, lc: &LegConfig, cfg: &Config, sink: Arc<dyn OrderSink>) -> LegManager {
    let mut inst = Instrument::new(lc.symbol.clone(), cfg.exchange.clone(), lc.tick_size, lc.lot_size, lc.price_multiplier);
    inst.send_in_lots = cfg.send_in_lots;
    LegManager::new(leg, inst, lc.thresholds.clone(), lc.fees, sink)
}

#[tokio::main]
async fn main() {
    // ---- Logging ----
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ---- Config ----
    let cfg = match config::load() {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "config error");
            std::process::exit(2);
        }
    };
    info!(
        strategy_id = cfg.strategy_id,
        leg1 = %cfg.leg1.symbol,
        leg2 = %cfg.leg2.symbol,
        thresholds1 = ?cfg.leg1.thresholds_file,
        thresholds2 = ?cfg.leg2.thresholds_file,
        snapshot = %cfg.snapshot_file,
        record = ?cfg.record_file,
        "startup config"
    );

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(cfg.metrics_port));

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    let recording = cfg.record_file.is_some();
    if let Some(path) = cfg.record_file.clone() {
        tokio::spawn(recorder::run(rec_rx, path));
    }

    // ---- Venue (mock) ----
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (ack_tx, ack_rx) = mpsc::channel::<OrderAck>(4096);
    tokio::spawn(gateway::run_venue(req_rx, ack_tx, cfg.mock_fill_ms, cfg.mock_fill_prob));
    let mut sink = ChannelSink::new(req_tx, 1);
    if recording {
        sink = sink.with_recorder(rec_tx.clone());
    }
    let sink: Arc<dyn OrderSink> = Arc::new(sink);

    // ---- Strategy ----
    let (snap_tx, snap_rx) = mpsc::unbounded_channel();
    tokio::spawn(snapshot::run(snap_rx, cfg.snapshot_file.clone()));

    let params = StrategyParams {
        strategy_id: cfg.strategy_id,
        max_quote_level: cfg.max_quote_level,
        use_invisible_book: cfg.use_invisible_book,
    };
    let strat = PairwiseArbStrategy::new(
        params,
        build_leg(LegId::Leg1, &cfg.leg1, &cfg, sink.clone()),
        build_leg(LegId::Leg2, &cfg.leg2, &cfg, sink),
        Arc::new(SystemClock),
    )
    .with_observer(Arc::new(MetricsObserver))
    .with_snapshot_sink(snap_tx);
    let strat = Arc::new(strat);

    // posisi dari sesi sebelumnya; snapshot milik strategi/simbol lain = tolak start
    match snapshot::load(&cfg.snapshot_file, cfg.strategy_id).await {
        Ok(Some(snap)) => {
            if let Err(e) = strat.restore(&snap) {
                error!(%e, "snapshot does not fit this configuration");
                std::process::exit(1);
            }
        }
        Ok(None) => info!(path = %cfg.snapshot_file, "no snapshot, starting flat"),
        Err(e) => {
            error!(%e, "snapshot load failed");
            std::process::exit(1);
        }
    }

    // ---- Feed (mock) ----
    let (md_tx, md_rx) = mpsc::channel::<Tick>(4096);
    tokio::spawn(feed::run_mock(
        md_tx,
        MockFeedCfg {
            symbol1: cfg.leg1.symbol.clone(),
            symbol2: cfg.leg2.symbol.clone(),
            tick_size: cfg.leg1.tick_size,
            start_px: cfg.mock_start_px,
            spread_mean: cfg.mock_spread_ticks,
            depth: 5,
            interval_ms: cfg.mock_interval_ms,
        },
    ));

    // ---- Control (stdin) ----
    let (ctl_tx, ctl_rx) = mpsc::channel::<ControlCommand>(64);
    tokio::spawn(control::run(ctl_rx, strat.clone()));
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ControlCommand>() {
                Ok(cmd) => {
                    if ctl_tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(%e, %line, "control: bad command"),
            }
        }
    });

    // ---- Ack + market data: dua task, hanya lock strategi yang mengurutkan ----
    let rec = recording.then(|| rec_tx.clone());
    let (ticks, acks) = (Arc::new(AtomicU64::new(0)), Arc::new(AtomicU64::new(0)));
    let ack_task = tokio::spawn(strategy::run_acks(ack_rx, strat.clone(), acks.clone(), rec.clone()));
    let md_task = tokio::spawn(strategy::run_market_data(md_rx, strat.clone(), ticks.clone(), rec));

    if cfg.auto_activate {
        strat.activate();
    }

    // ---- Heartbeat ----
    let mut heartbeat = interval(Duration::from_secs(1));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            _ = heartbeat.tick() => {
                let s = strat.status();
                metrics::publish_status(&s);
                info!(
                    ticks = ticks.swap(0, Ordering::Relaxed),
                    acks = acks.swap(0, Ordering::Relaxed),
                    mode = s.mode.label(),
                    spread = s.spread,
                    avg = s.spread_avg,
                    leg1_net = s.leg1.net,
                    leg2_net = s.leg2.net,
                    pnl = s.leg1.net_pnl + s.leg2.net_pnl,
                    "heartbeat"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    // ---- Shutdown: stop ticks, tarik order, ack task jalan terus sebentar, simpan posisi ----
    md_task.abort();
    strat.deactivate();
    sleep(Duration::from_millis(500)).await;
    ack_task.abort();

    let snap = strat.snapshot();
    match snapshot::save(&cfg.snapshot_file, &snap).await {
        Ok(()) => info!(path = %cfg.snapshot_file, "final snapshot saved"),
        Err(e) => error!(%e, "final snapshot save failed"),
    }
    if recording {
        let _ = rec_tx.try_send(Event::Note("shutdown".into()));
    }
}
