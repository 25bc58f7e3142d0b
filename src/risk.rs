// ===============================
// src/risk.rs
// ===============================
use thiserror::Error;

use crate::domain::{LegId, Qty, Side};
use crate::execution_state::ExecutionState;
use crate::thresholds::ThresholdSet;

/// Batas reject berturut-turut sebelum leg dipaksa keluar.
pub const REJECT_LIMIT: u64 = 200;

/// Kenapa strategi masuk mode liquidation.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SquareoffReason {
    #[error("spread outside safety band")]
    SpreadBand,
    #[error("combined net pnl {pnl:.2} below max loss -{limit:.2}")]
    MaxLoss { pnl: f64, limit: f64 },
    #[error("hedge retry ladder exhausted")]
    RetryExhausted,
    #[error("{leg} order count {count} reached limit {limit}")]
    MaxOrders { leg: LegId, count: u64, limit: u64 },
    #[error("{leg} {side} traded qty {qty} reached limit {limit}")]
    MaxTradedQty { leg: LegId, side: Side, qty: Qty, limit: Qty },
    #[error("{leg} hit {count} consecutive rejects")]
    RejectLimit { leg: LegId, count: u64 },
    #[error("operator request")]
    Operator,
}

impl SquareoffReason {
    pub fn label(&self) -> &'static str {
        match self {
            SquareoffReason::SpreadBand => "spread_band",
            SquareoffReason::MaxLoss { .. } => "max_loss",
            SquareoffReason::RetryExhausted => "retry_exhausted",
            SquareoffReason::MaxOrders { .. } => "max_orders",
            SquareoffReason::MaxTradedQty { .. } => "max_traded_qty",
            SquareoffReason::RejectLimit { .. } => "reject_limit",
            SquareoffReason::Operator => "operator",
        }
    }
}

/// Max loss dibaca sebagai magnitudo: breach jika total net pnl < -|max_loss|.
pub fn check_combined_loss(leg1: &ExecutionState, leg2: &ExecutionState, max_loss: Option<f64>) -> Result<(), SquareoffReason> {
    let Some(limit) = max_loss.map(f64::abs) else { return Ok(()) };
    let pnl = leg1.net_pnl + leg2.net_pnl;
    if pnl < -limit {
        return Err(SquareoffReason::MaxLoss { pnl, limit });
    }
    Ok(())
}

pub fn check_leg_limits(leg: LegId, st: &ExecutionState, thold: &ThresholdSet) -> Result<(), SquareoffReason> {
    if let Some(limit) = thold.max_order_count {
        if st.order_count >= limit {
            return Err(SquareoffReason::MaxOrders { leg, count: st.order_count, limit });
        }
    }
    if let Some(limit) = thold.max_traded_qty {
        for (side, qty) in [(Side::Buy, st.buy_total_qty), (Side::Sell, st.sell_total_qty)] {
            if qty >= limit {
                return Err(SquareoffReason::MaxTradedQty { leg, side, qty, limit });
            }
        }
    }
    if st.reject_count >= REJECT_LIMIT {
        return Err(SquareoffReason::RejectLimit { leg, count: st.reject_count });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_loss_uses_both_legs() {
        let a = ExecutionState { net_pnl: -30.0, ..Default::default() };
        let b = ExecutionState { net_pnl: -25.0, ..Default::default() };
        assert!(check_combined_loss(&a, &b, None).is_ok());
        assert!(check_combined_loss(&a, &b, Some(60.0)).is_ok());
        assert!(matches!(check_combined_loss(&a, &b, Some(50.0)), Err(SquareoffReason::MaxLoss { .. })));
        // sign of the configured limit does not matter
        assert!(check_combined_loss(&a, &b, Some(-50.0)).is_err());
    }

    #[test]
    fn leg_limits() {
        let thold = ThresholdSet { max_order_count: Some(10), max_traded_qty: Some(50), ..Default::default() };
        let st = ExecutionState { order_count: 9, sell_total_qty: 49, ..Default::default() };
        assert!(check_leg_limits(LegId::Leg1, &st, &thold).is_ok());

        let st = ExecutionState { order_count: 10, ..Default::default() };
        assert_eq!(
            check_leg_limits(LegId::Leg1, &st, &thold),
            Err(SquareoffReason::MaxOrders { leg: LegId::Leg1, count: 10, limit: 10 })
        );

        let st = ExecutionState { sell_total_qty: 50, ..Default::default() };
        assert!(matches!(
            check_leg_limits(LegId::Leg2, &st, &thold),
            Err(SquareoffReason::MaxTradedQty { side: Side::Sell, .. })
        ));

        let st = ExecutionState { reject_count: REJECT_LIMIT, ..Default::default() };
        assert_eq!(check_leg_limits(LegId::Leg2, &st, &ThresholdSet::default()).map_err(|e| e.label()), Err("reject_limit"));
    }
}
