// ===============================
// src/gateway.rs (transport seam + mock venue)
// ===============================
use ahash::AHashMap;
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::{
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::domain::{AckEvent, Event, OrderAck, OrderId, OrderRequest, Px, Qty};
use crate::metrics::{ACKS, REQUESTS};

/// Outbound boundary. Called under the strategy lock, so implementations must not block.
pub trait OrderSink: Send + Sync {
    fn next_order_id(&self) -> OrderId;
    fn submit(&self, req: OrderRequest);
}

/// Sink yang meneruskan request ke task venue lewat channel unbounded (fire-and-forget).
pub struct ChannelSink {
    next_id: AtomicU64,
    tx: mpsc::UnboundedSender<OrderRequest>,
    rec_tx: Option<mpsc::Sender<Event>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<OrderRequest>, first_id: OrderId) -> Self {
        Self { next_id: AtomicU64::new(first_id), tx, rec_tx: None }
    }

    pub fn with_recorder(mut self, rec_tx: mpsc::Sender<Event>) -> Self {
        self.rec_tx = Some(rec_tx);
        self
    }
}

impl OrderSink for ChannelSink {
    fn next_order_id(&self) -> OrderId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn submit(&self, req: OrderRequest) {
        if let Some(rec) = &self.rec_tx {
            // recorder penuh -> drop saja, jangan pernah block di bawah lock
            let _ = rec.try_send(Event::Req(req.clone()));
        }
        if self.tx.send(req).is_err() {
            warn!("gateway: venue channel closed, request dropped");
        }
    }
}

/// Test double: keeps every request in order.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingSink {
    next_id: std::sync::Arc<AtomicU64>,
    sent: std::sync::Arc<std::sync::Mutex<Vec<OrderRequest>>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self { next_id: std::sync::Arc::new(AtomicU64::new(1)), ..Default::default() }
    }

    pub fn requests(&self) -> Vec<OrderRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<OrderRequest> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[cfg(test)]
impl OrderSink for RecordingSink {
    fn next_order_id(&self) -> OrderId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn submit(&self, req: OrderRequest) {
        self.sent.lock().unwrap().push(req);
    }
}

#[derive(Debug, Clone, Copy)]
struct Resting {
    px: Px,
    open: Qty,
}

fn now_ns() -> i128 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128
}

/// Mock venue: konfirmasi setiap request, order agresif langsung full fill,
/// order pasif diisi acak tiap `fill_ms` dengan peluang `fill_prob`.
pub async fn run_venue(
    mut rx: mpsc::UnboundedReceiver<OrderRequest>,
    ack_tx: mpsc::Sender<OrderAck>,
    fill_ms: u64,
    fill_prob: f64,
) {
    info!(fill_ms, fill_prob, "mock venue started");
    let mut book: AHashMap<OrderId, Resting> = AHashMap::new();
    let mut tick = interval(Duration::from_millis(fill_ms.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_req = rx.recv() => {
                let Some(req) = maybe_req else {
                    info!("mock venue: request channel closed, stopped");
                    break;
                };
                REQUESTS.with_label_values(&[leg_label(&req), req.kind()]).inc();
                for ack in venue_response(&mut book, &req) {
                    ACKS.with_label_values(&[ack.event.label()]).inc();
                    if ack_tx.send(ack).await.is_err() {
                        return;
                    }
                }
            }
            _ = tick.tick() => {
                // jangan simpan ThreadRng melewati .await
                let fills: Vec<OrderAck> = {
                    let mut rng = rand::thread_rng();
                    book.iter()
                        .filter(|_| rng.gen_bool(fill_prob.clamp(0.0, 1.0)))
                        .map(|(&order_id, r)| OrderAck {
                            ts_ns: now_ns(),
                            order_id,
                            event: AckEvent::Trade { px: r.px, qty: r.open },
                        })
                        .collect()
                };
                for ack in fills {
                    book.remove(&ack.order_id);
                    debug!(order_id = ack.order_id, "mock venue: passive fill");
                    ACKS.with_label_values(&[ack.event.label()]).inc();
                    if ack_tx.send(ack).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn leg_label(req: &OrderRequest) -> &'static str {
    let leg = match req {
        OrderRequest::New { leg, .. } | OrderRequest::Modify { leg, .. } | OrderRequest::Cancel { leg, .. } => leg,
    };
    match leg {
        crate::domain::LegId::Leg1 => "leg1",
        crate::domain::LegId::Leg2 => "leg2",
    }
}

fn venue_response(book: &mut AHashMap<OrderId, Resting>, req: &OrderRequest) -> Vec<OrderAck> {
    let ack = |order_id, event| OrderAck { ts_ns: now_ns(), order_id, event };
    match *req {
        OrderRequest::New { order_id, px, qty, hit, .. } => {
            if hit.is_aggressive() {
                vec![ack(order_id, AckEvent::NewConfirm), ack(order_id, AckEvent::Trade { px, qty })]
            } else {
                book.insert(order_id, Resting { px, open: qty });
                vec![ack(order_id, AckEvent::NewConfirm)]
            }
        }
        OrderRequest::Modify { order_id, px, qty, .. } => match book.get_mut(&order_id) {
            Some(r) => {
                r.px = px;
                r.open = qty;
                vec![ack(order_id, AckEvent::ModifyConfirm)]
            }
            None => vec![ack(order_id, AckEvent::ModifyReject)],
        },
        OrderRequest::Cancel { order_id, .. } => match book.remove(&order_id) {
            Some(_) => vec![ack(order_id, AckEvent::CancelConfirm)],
            // sudah terisi / tidak dikenal
            None => vec![ack(order_id, AckEvent::CancelReject)],
        },
    }
}
