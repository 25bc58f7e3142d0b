// ===============================
// src/strategy/mod.rs
// ===============================
//
// Pairwise arbitrage coordinator. Leg 1 di-quote pasif, leg 2 di-hedge agresif.
//
// Semua entry point publik (tick, ack, control) mengambil satu mutex yang
// sama selama eksekusi penuh; helper internal di `Core` menganggap lock
// sudah dipegang. Jangan memanggil entry point publik dari dalam observer.
//
mod hedge;
mod quote;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::domain::{Event, HitType, LegId, OrderAck, OrderId, Px, Qty, Side, Tick};
use crate::leg_manager::LegManager;
use crate::risk::{self, SquareoffReason};
use crate::snapshot::{LegSnapshot, Snapshot, SnapshotError};
use crate::spread_tracker::SpreadTracker;
use crate::thresholds::{ThresholdError, ThresholdSet};

use hedge::HedgeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Inactive,
    Active,
    Liquidating,
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Inactive => "inactive",
            Mode::Active => "active",
            Mode::Liquidating => "liquidating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEvent {
    pub leg: LegId,
    pub order_id: OrderId,
    pub side: Side,
    pub px: Px,
    pub qty: Qty,
    pub hit: HitType,
    pub net_position: Qty,
    pub net_pnl: f64,
}

/// Hooks registered at construction. Called under the strategy lock: keep them cheap.
pub trait StrategyObserver: Send + Sync {
    fn on_fill(&self, _fill: &FillEvent) {}
    fn on_mode_change(&self, _from: Mode, _to: Mode, _reason: Option<&SquareoffReason>) {}
}

#[derive(Debug, Clone)]
pub struct StrategyParams {
    pub strategy_id: u32,
    /// Overrides the leg-1 threshold's max_quote_level when set.
    pub max_quote_level: Option<usize>,
    pub use_invisible_book: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LegStatus {
    pub symbol: String,
    pub net: Qty,
    pub passive: Qty,
    pub aggressive: Qty,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub fees: f64,
    pub net_pnl: f64,
    /// Venue last traded price and our own last fill price.
    pub last_px: Px,
    pub last_fill_px: Px,
    pub live_orders: usize,
    pub trades: u64,
    pub rejects: u64,
}

impl LegStatus {
    fn of(lm: &LegManager) -> Self {
        let st = &lm.state;
        Self {
            symbol: lm.symbol().to_string(),
            net: st.net_position,
            passive: st.passive_position,
            aggressive: st.aggressive_position,
            realized_pnl: st.realized_pnl,
            unrealized_pnl: st.unrealized_pnl,
            fees: st.fees,
            net_pnl: st.net_pnl,
            last_px: st.ltp,
            last_fill_px: st.last_trade_px,
            live_orders: lm.om.live_count(),
            trades: st.trade_count,
            rejects: st.total_rejects,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    pub strategy_id: u32,
    pub mode: Mode,
    pub spread: f64,
    pub spread_avg: f64,
    pub spread_offset: f64,
    pub net_exposure: Qty,
    pub retry_step: u32,
    pub leg1: LegStatus,
    pub leg2: LegStatus,
}

pub(crate) struct Core {
    params: StrategyParams,
    mode: Mode,
    leg1: LegManager,
    leg2: LegManager,
    spread: SpreadTracker,
    hedge: HedgeState,
    band_breaches: u32,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn StrategyObserver>>,
    snapshot_tx: Option<mpsc::UnboundedSender<Snapshot>>,
}

pub struct PairwiseArbStrategy {
    core: Mutex<Core>,
}

impl PairwiseArbStrategy {
    pub fn new(params: StrategyParams, leg1: LegManager, leg2: LegManager, clock: Arc<dyn Clock>) -> Self {
        let spread = SpreadTracker::new(leg1.thold.alpha, leg1.inst.tick_size, leg1.thold.avg_spread_away);
        Self {
            core: Mutex::new(Core {
                params,
                mode: Mode::Inactive,
                leg1,
                leg2,
                spread,
                hedge: HedgeState::default(),
                band_breaches: 0,
                clock,
                observers: Vec::new(),
                snapshot_tx: None,
            }),
        }
    }

    pub fn with_observer(mut self, obs: Arc<dyn StrategyObserver>) -> Self {
        self.core.get_mut().unwrap_or_else(|e| e.into_inner()).observers.push(obs);
        self
    }

    /// Snapshots are pushed here on liquidation; a persistence task does the I/O.
    pub fn with_snapshot_sink(mut self, tx: mpsc::UnboundedSender<Snapshot>) -> Self {
        self.core.get_mut().unwrap_or_else(|e| e.into_inner()).snapshot_tx = Some(tx);
        self
    }

    // poisoned lock: state is still consistent enough to keep liquidating
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on_tick(&self, tick: &Tick) { self.lock().handle_tick(tick) }

    pub fn on_ack(&self, ack: &OrderAck) { self.lock().handle_ack(ack) }

    /// Resume quoting from Inactive or Liquidating.
    pub fn activate(&self) { self.lock().activate() }

    /// Stop quoting and pull resting orders; positions are left as they are.
    pub fn deactivate(&self) { self.lock().deactivate() }

    pub fn liquidate(&self, aggressive: bool) { self.lock().squareoff(SquareoffReason::Operator, aggressive) }

    pub fn reload_thresholds(&self, leg: LegId, set: ThresholdSet) -> Result<(), ThresholdError> {
        set.validate()?;
        self.lock().reload(leg, set);
        Ok(())
    }

    /// Threshold set currently in force on one leg.
    pub fn thresholds(&self, leg: LegId) -> ThresholdSet {
        let core = self.lock();
        match leg { LegId::Leg1 => core.leg1.thold.clone(), LegId::Leg2 => core.leg2.thold.clone() }
    }

    pub fn set_external_offset(&self, v: f64) {
        let mut core = self.lock();
        core.spread.set_external_offset(v);
        info!(offset = v, avg = core.spread.avg(), "spread offset set");
    }

    pub fn restore(&self, snap: &Snapshot) -> Result<(), SnapshotError> { self.lock().restore(snap) }

    pub fn snapshot(&self) -> Snapshot { self.lock().build_snapshot() }

    pub fn status(&self) -> StrategyStatus { self.lock().status() }

    pub fn mode(&self) -> Mode { self.lock().mode }
}

/// Market-data task. Runs beside [`run_acks`]; the strategy lock is the only
/// thing ordering the two.
pub async fn run_market_data(
    mut rx: mpsc::Receiver<Tick>,
    strat: Arc<PairwiseArbStrategy>,
    seen: Arc<AtomicU64>,
    rec: Option<mpsc::Sender<Event>>,
) {
    while let Some(md) = rx.recv().await {
        seen.fetch_add(1, Ordering::Relaxed);
        strat.on_tick(&md);
        if let Some(tx) = &rec {
            let _ = tx.try_send(Event::Md(md));
        }
    }
    info!("md path: feed closed");
}

/// Venue ack task.
pub async fn run_acks(
    mut rx: mpsc::Receiver<OrderAck>,
    strat: Arc<PairwiseArbStrategy>,
    seen: Arc<AtomicU64>,
    rec: Option<mpsc::Sender<Event>>,
) {
    while let Some(ack) = rx.recv().await {
        seen.fetch_add(1, Ordering::Relaxed);
        strat.on_ack(&ack);
        if let Some(tx) = &rec {
            let _ = tx.try_send(Event::Ack(ack));
        }
    }
    info!("ack path: venue closed");
}

impl Core {
    fn leg_mut(&mut self, leg: LegId) -> &mut LegManager {
        match leg { LegId::Leg1 => &mut self.leg1, LegId::Leg2 => &mut self.leg2 }
    }

    fn set_mode(&mut self, to: Mode, reason: Option<&SquareoffReason>) {
        let from = self.mode;
        if from == to {
            return;
        }
        self.mode = to;
        info!(from = from.label(), to = to.label(), reason = ?reason, "strategy mode");
        for obs in &self.observers {
            obs.on_mode_change(from, to, reason);
        }
    }

    fn handle_tick(&mut self, tick: &Tick) {
        let primary = if tick.symbol == self.leg1.inst.symbol {
            self.leg1.on_tick(tick);
            true
        } else if tick.symbol == self.leg2.inst.symbol {
            self.leg2.on_tick(tick);
            false
        } else {
            debug!(symbol = %tick.symbol, "tick for foreign symbol ignored");
            return;
        };

        if !(self.leg1.inst.has_levels() && self.leg2.inst.has_levels()) {
            return;
        }

        let valid = self.spread.update(self.leg1.inst.mid_price(), self.leg2.inst.mid_price(), primary);
        if !valid {
            self.band_breaches += 1;
            let limit = self.leg1.thold.band_breach_limit.max(1);
            warn!(
                spread = self.spread.current,
                avg = self.spread.avg(),
                band = self.spread.band(),
                breaches = self.band_breaches,
                "spread outside safety band"
            );
            match self.mode {
                Mode::Active if self.band_breaches >= limit => self.squareoff(SquareoffReason::SpreadBand, false),
                Mode::Liquidating => self.drive_liquidation(),
                _ => {}
            }
            return;
        }
        self.band_breaches = 0;

        match self.mode {
            Mode::Active => {
                if let Err(reason) = self.risk_check() {
                    self.squareoff(reason, false);
                    return;
                }
                self.quote();
            }
            Mode::Liquidating => self.drive_liquidation(),
            Mode::Inactive => {}
        }
    }

    fn handle_ack(&mut self, ack: &OrderAck) {
        let leg = if self.leg1.om.get(ack.order_id).is_some() {
            LegId::Leg1
        } else if self.leg2.om.get(ack.order_id).is_some() {
            LegId::Leg2
        } else {
            warn!(order_id = ack.order_id, event = ack.event.label(), "ack for unknown order, ignored");
            return;
        };

        let Some(out) = self.leg_mut(leg).on_ack(ack) else { return };

        if let Some((px, qty)) = out.fill {
            // any progress clears the escalation
            self.hedge.repeat = 1;
            let lm = self.leg_mut(leg);
            let fill = FillEvent {
                leg,
                order_id: out.order_id,
                side: out.side,
                px,
                qty,
                hit: out.hit,
                net_position: lm.state.net_position,
                net_pnl: lm.state.net_pnl,
            };
            for obs in &self.observers {
                obs.on_fill(&fill);
            }
        }
        if leg == LegId::Leg2 && out.hit.is_aggressive() && out.terminal {
            self.hedge.release(out.side);
        }

        match self.mode {
            Mode::Active => {
                if let Err(reason) = self.risk_check() {
                    self.squareoff(reason, false);
                    return;
                }
                self.hedge_aggressive();
            }
            Mode::Liquidating => self.drive_liquidation(),
            Mode::Inactive => {}
        }
    }

    fn risk_check(&self) -> Result<(), SquareoffReason> {
        risk::check_combined_loss(&self.leg1.state, &self.leg2.state, self.leg1.thold.max_loss)?;
        risk::check_leg_limits(LegId::Leg1, &self.leg1.state, &self.leg1.thold)?;
        risk::check_leg_limits(LegId::Leg2, &self.leg2.state, &self.leg2.thold)
    }

    fn activate(&mut self) {
        if self.mode == Mode::Active {
            return;
        }
        for lm in [&mut self.leg1, &mut self.leg2] {
            lm.state.clear_exit_flags();
            lm.state.active = true;
        }
        self.hedge.repeat = 1;
        self.band_breaches = 0;
        self.set_mode(Mode::Active, None);
    }

    fn deactivate(&mut self) {
        let mut cancelled = 0;
        for lm in [&mut self.leg1, &mut self.leg2] {
            lm.state.active = false;
            cancelled += lm.cancel_all();
        }
        info!(cancelled, "strategy deactivated");
        self.set_mode(Mode::Inactive, None);
    }

    fn legs_idle(&self) -> bool {
        [&self.leg1, &self.leg2].iter().all(|lm| lm.state.is_flat() && lm.om.is_empty())
    }

    /// Enter (or continue) liquidation of both legs.
    pub(crate) fn squareoff(&mut self, reason: SquareoffReason, aggressive: bool) {
        if self.mode != Mode::Active && self.legs_idle() {
            debug!(%reason, "squareoff: nothing to do");
            self.set_mode(Mode::Inactive, Some(&reason));
            return;
        }
        if self.mode == Mode::Liquidating {
            if aggressive {
                self.leg1.state.agg_flat = true;
                self.leg2.state.agg_flat = true;
            }
            self.drive_liquidation();
            return;
        }

        warn!(%reason, aggressive, "squareoff triggered");
        for lm in [&mut self.leg1, &mut self.leg2] {
            lm.state.on_exit = true;
            lm.state.on_cancel = true;
            lm.state.agg_flat = aggressive;
        }
        self.set_mode(Mode::Liquidating, Some(&reason));
        self.push_snapshot();
        self.drive_liquidation();
    }

    fn drive_liquidation(&mut self) {
        let done1 = self.leg1.liquidate();
        let done2 = self.leg2.liquidate();
        if done1 && done2 {
            self.leg1.state.active = false;
            self.leg2.state.active = false;
            info!("liquidation complete, both legs flat");
            self.set_mode(Mode::Inactive, None);
            self.push_snapshot();
        }
    }

    fn reload(&mut self, leg: LegId, set: ThresholdSet) {
        if leg == LegId::Leg1 {
            self.spread.set_params(set.alpha, set.avg_spread_away);
        }
        info!(%leg, begin_place = set.begin_place, max_size = set.max_size, "thresholds reloaded");
        self.leg_mut(leg).reload(set);
    }

    fn restore(&mut self, snap: &Snapshot) -> Result<(), SnapshotError> {
        for (name, lm, ls) in [("leg1", &self.leg1, &snap.leg1), ("leg2", &self.leg2, &snap.leg2)] {
            if !ls.symbol.is_empty() && ls.symbol != lm.inst.symbol {
                return Err(SnapshotError::SymbolMismatch {
                    leg: name,
                    expected: lm.inst.symbol.clone(),
                    found: ls.symbol.clone(),
                });
            }
        }
        // only the buckets are carried; cost basis does not survive a restart
        self.leg1.state.passive_position = snap.leg1.passive;
        self.leg1.state.aggressive_position = snap.leg1.aggressive;
        self.leg2.state.passive_position = snap.leg2.passive;
        self.leg2.state.aggressive_position = snap.leg2.aggressive;
        self.spread.seed(snap.spread_origin);
        info!(
            origin = snap.spread_origin,
            leg1_passive = snap.leg1.passive,
            leg2_aggressive = snap.leg2.aggressive,
            "state restored from snapshot"
        );
        Ok(())
    }

    fn build_snapshot(&self) -> Snapshot {
        let leg = |lm: &LegManager| LegSnapshot {
            symbol: lm.inst.symbol.clone(),
            passive: lm.state.passive_position,
            aggressive: lm.state.aggressive_position,
        };
        Snapshot {
            strategy_id: self.params.strategy_id,
            spread_origin: self.spread.origin(),
            leg1: leg(&self.leg1),
            leg2: leg(&self.leg2),
        }
    }

    fn push_snapshot(&self) {
        if let Some(tx) = &self.snapshot_tx {
            if tx.send(self.build_snapshot()).is_err() {
                warn!("snapshot writer gone, snapshot dropped");
            }
        }
    }

    fn status(&self) -> StrategyStatus {
        StrategyStatus {
            strategy_id: self.params.strategy_id,
            mode: self.mode,
            spread: self.spread.current,
            spread_avg: self.spread.avg(),
            spread_offset: self.spread.external_offset(),
            net_exposure: self.net_exposure(),
            retry_step: self.hedge.repeat,
            leg1: LegStatus::of(&self.leg1),
            leg2: LegStatus::of(&self.leg2),
        }
    }
}
