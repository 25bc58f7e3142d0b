// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{error, info};

use crate::risk::SquareoffReason;
use crate::strategy::{FillEvent, Mode, StrategyObserver, StrategyStatus};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Flow --------
pub static TICKS_BY_SYMBOL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticks_total_by_symbol", "market data ticks per symbol"),
        &["symbol"],
    )
    .unwrap()
});

pub static REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("order_requests_total", "outbound order requests (labels: leg, kind)"),
        &["leg", "kind"],
    )
    .unwrap()
});

pub static ACKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("order_acks_total", "venue acks by event"), &["event"]).unwrap()
});

pub static TRADES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("trades_total", "fills applied per leg"), &["leg"]).unwrap()
});

pub static LIQUIDATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("liquidations_total", "squareoff triggers by reason"),
        &["reason"],
    )
    .unwrap()
});

// -------- State --------
pub static SPREAD: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("spread_current", "last observed mid1 - mid2").unwrap());

pub static SPREAD_AVG: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("spread_avg", "EWMA spread plus external offset").unwrap());

pub static LEG_PNL: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("leg_net_pnl", "net pnl per leg after fees"), &["leg"]).unwrap()
});

pub static POSITION: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("leg_position", "position per leg (bucket: net, passive, aggressive)"),
        &["leg", "bucket"],
    )
    .unwrap()
});

pub static MODE: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("strategy_mode", "0 inactive, 1 active, 2 liquidating").unwrap());

pub static RETRY_STEP: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("hedge_retry_step", "current aggressive hedge ladder step").unwrap());

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TICKS_BY_SYMBOL.clone())),
        REGISTRY.register(Box::new(REQUESTS.clone())),
        REGISTRY.register(Box::new(ACKS.clone())),
        REGISTRY.register(Box::new(TRADES.clone())),
        REGISTRY.register(Box::new(LIQUIDATIONS.clone())),
        REGISTRY.register(Box::new(SPREAD.clone())),
        REGISTRY.register(Box::new(SPREAD_AVG.clone())),
        REGISTRY.register(Box::new(LEG_PNL.clone())),
        REGISTRY.register(Box::new(POSITION.clone())),
        REGISTRY.register(Box::new(MODE.clone())),
        REGISTRY.register(Box::new(RETRY_STEP.clone())),
    ] {
        // sudah terdaftar (init dipanggil dua kali) -> abaikan
        let _ = m;
    }
}

fn mode_value(mode: Mode) -> i64 {
    match mode {
        Mode::Inactive => 0,
        Mode::Active => 1,
        Mode::Liquidating => 2,
    }
}

/// Copy a status snapshot into the gauges. Called from the heartbeat, outside the strategy lock.
pub fn publish_status(s: &StrategyStatus) {
    SPREAD.set(s.spread);
    SPREAD_AVG.set(s.spread_avg);
    MODE.set(mode_value(s.mode));
    RETRY_STEP.set(s.retry_step as i64);
    for (leg, ls) in [("leg1", &s.leg1), ("leg2", &s.leg2)] {
        LEG_PNL.with_label_values(&[leg]).set(ls.net_pnl);
        POSITION.with_label_values(&[leg, "net"]).set(ls.net);
        POSITION.with_label_values(&[leg, "passive"]).set(ls.passive);
        POSITION.with_label_values(&[leg, "aggressive"]).set(ls.aggressive);
    }
}

/// Strategy hook feeding the event counters.
pub struct MetricsObserver;

impl StrategyObserver for MetricsObserver {
    fn on_fill(&self, fill: &FillEvent) {
        let leg = fill.leg.to_string();
        TRADES.with_label_values(&[leg.as_str()]).inc();
        LEG_PNL.with_label_values(&[leg.as_str()]).set(fill.net_pnl);
    }

    fn on_mode_change(&self, _from: Mode, to: Mode, reason: Option<&SquareoffReason>) {
        MODE.set(mode_value(to));
        if let (Mode::Liquidating, Some(r)) = (to, reason) {
            LIQUIDATIONS.with_label_values(&[r.label()]).inc();
        }
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // cukup konsumsi header, tidak di-parse
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(%addr, %e, "metrics bind failed, exporter disabled");
                return;
            }
        };
        info!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(%e, "metrics accept error"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HitType, LegId, Side};

    #[test]
    fn observer_counts_fills_and_liquidations() {
        init();
        let before = TRADES.with_label_values(&["leg2"]).get();
        MetricsObserver.on_fill(&FillEvent {
            leg: LegId::Leg2,
            order_id: 1,
            side: Side::Sell,
            px: 90,
            qty: 2,
            hit: HitType::Cross,
            net_position: -2,
            net_pnl: -1.5,
        });
        assert_eq!(TRADES.with_label_values(&["leg2"]).get(), before + 1);
        assert_eq!(LEG_PNL.with_label_values(&["leg2"]).get(), -1.5);

        let before = LIQUIDATIONS.with_label_values(&["retry_exhausted"]).get();
        MetricsObserver.on_mode_change(Mode::Active, Mode::Liquidating, Some(&SquareoffReason::RetryExhausted));
        // completion carries no reason and is not a new trigger
        MetricsObserver.on_mode_change(Mode::Liquidating, Mode::Inactive, None);
        assert_eq!(LIQUIDATIONS.with_label_values(&["retry_exhausted"]).get(), before + 1);
    }

    #[test]
    fn encoded_output_names_registered_families() {
        init();
        TICKS_BY_SYMBOL.with_label_values(&["ag2603"]).inc();
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("ticks_total_by_symbol"));
    }
}
