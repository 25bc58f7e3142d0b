// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order identifier. Allocation belongs to the transport; the engine only routes on it.
pub type OrderId = u64;

/// Price in the instrument's integer price scale (same convention as the feed).
pub type Px = i64;

/// Quantity in units (or lots when the leg sends in lots).
pub type Qty = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side {
    pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } }
    pub fn opposite(&self) -> Side { match self { Side::Buy => Side::Sell, Side::Sell => Side::Buy } }
}
impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Side::Buy => write!(f, "buy"), Side::Sell => write!(f, "sell") }
    }
}

/// Standard = resting maker quote. Cross/Match = one-shot aggressive order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitType { Standard, Improve, Cross, Match }
impl HitType {
    pub fn is_aggressive(&self) -> bool { matches!(self, HitType::Cross | HitType::Match) }
}

/// Live statuses only. Terminal outcomes remove the order from every index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    NewConfirm,
    ModifyPending,
    ModifyConfirm,
    CancelPending,
}
impl OrderStatus {
    /// Statuses from which a plain cancel may be issued.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::NewConfirm | OrderStatus::ModifyConfirm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegId { Leg1, Leg2 }
impl fmt::Display for LegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { LegId::Leg1 => write!(f, "leg1"), LegId::Leg2 => write!(f, "leg2") }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level { pub px: Px, pub qty: Qty }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tick {
    pub ts_ns: i128,
    pub symbol: String,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub last_traded_px: Px,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AckEvent {
    NewConfirm,
    ModifyConfirm,
    ModifyReject,
    CancelConfirm,
    CancelReject,
    Trade { px: Px, qty: Qty },
    Reject,
}
impl AckEvent {
    pub fn label(&self) -> &'static str {
        match self {
            AckEvent::NewConfirm => "new_confirm",
            AckEvent::ModifyConfirm => "modify_confirm",
            AckEvent::ModifyReject => "modify_reject",
            AckEvent::CancelConfirm => "cancel_confirm",
            AckEvent::CancelReject => "cancel_reject",
            AckEvent::Trade { .. } => "trade",
            AckEvent::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderAck { pub ts_ns: i128, pub order_id: OrderId, pub event: AckEvent }

/// Outbound request as it leaves the engine for the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderRequest {
    New { order_id: OrderId, leg: LegId, symbol: String, side: Side, px: Px, qty: Qty, hit: HitType },
    Modify { order_id: OrderId, leg: LegId, symbol: String, px: Px, qty: Qty },
    Cancel { order_id: OrderId, leg: LegId, symbol: String },
}
impl OrderRequest {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderRequest::New { order_id, .. }
            | OrderRequest::Modify { order_id, .. }
            | OrderRequest::Cancel { order_id, .. } => *order_id,
        }
    }
    pub fn kind(&self) -> &'static str {
        match self {
            OrderRequest::New { .. } => "new",
            OrderRequest::Modify { .. } => "modify",
            OrderRequest::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event { Md(Tick), Ack(OrderAck), Req(OrderRequest), Note(String) }
