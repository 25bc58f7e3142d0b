// ===============================
// src/snapshot.rs
// ===============================
//
// Snapshot posisi per strategi (JSON, versioned). Ditulis saat liquidation
// dan shutdown, dibaca sekali saat startup.
//
// v1 (legacy): {"strategy_id", "avgPx", "ytd1", "2day", "ytd2",
//               "m_origbaseName1", "m_origbaseName2"}; tanpa field version.
// v2         : lihat `Snapshot`.
//
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tokio::{fs, sync::mpsc};
use tracing::{error, info};

use crate::domain::Qty;

pub const CURRENT_VERSION: u64 = 2;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("snapshot decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u64),
    #[error("snapshot belongs to strategy {found}, expected {expected}")]
    StrategyMismatch { expected: u32, found: u32 },
    #[error("{leg} snapshot symbol {found} does not match {expected}")]
    SymbolMismatch { leg: &'static str, expected: String, found: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegSnapshot {
    pub symbol: String,
    pub passive: Qty,
    pub aggressive: Qty,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub strategy_id: u32,
    pub spread_origin: f64,
    pub leg1: LegSnapshot,
    pub leg2: LegSnapshot,
}

#[derive(Serialize)]
struct Envelope<'a> {
    version: u64,
    #[serde(flatten)]
    snapshot: &'a Snapshot,
}

#[derive(Debug, Deserialize)]
struct LegacyV1 {
    #[serde(default)]
    strategy_id: u32,
    #[serde(rename = "avgPx", default)]
    avg_px: f64,
    #[serde(default)]
    ytd1: Qty,
    #[serde(rename = "2day", default)]
    two_day1: Qty,
    #[serde(default)]
    ytd2: Qty,
    #[serde(rename = "m_origbaseName1", default)]
    base_name1: String,
    #[serde(rename = "m_origbaseName2", default)]
    base_name2: String,
}

impl From<LegacyV1> for Snapshot {
    fn from(v1: LegacyV1) -> Self {
        // ytd + hari ini digabung jadi satu bucket passive
        Snapshot {
            strategy_id: v1.strategy_id,
            spread_origin: v1.avg_px,
            leg1: LegSnapshot { symbol: v1.base_name1, passive: v1.ytd1 + v1.two_day1, aggressive: 0 },
            leg2: LegSnapshot { symbol: v1.base_name2, passive: 0, aggressive: v1.ytd2 },
        }
    }
}

impl Snapshot {
    /// Decode any known version into the current shape.
    pub fn from_json_str(text: &str) -> Result<Self, SnapshotError> {
        let value: Value = serde_json::from_str(text)?;
        match value.get("version").and_then(Value::as_u64).unwrap_or(1) {
            1 => Ok(serde_json::from_value::<LegacyV1>(value)?.into()),
            2 => Ok(serde_json::from_value(value)?),
            n => Err(SnapshotError::UnsupportedVersion(n)),
        }
    }

    pub fn to_json_string(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(&Envelope { version: CURRENT_VERSION, snapshot: self })?)
    }
}

/// Missing file = fresh start.
pub async fn load(path: impl AsRef<Path>, strategy_id: u32) -> Result<Option<Snapshot>, SnapshotError> {
    let path = path.as_ref();
    let text = match fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(SnapshotError::Io { path: path.display().to_string(), source }),
    };
    let snap = Snapshot::from_json_str(&text)?;
    if snap.strategy_id != strategy_id {
        return Err(SnapshotError::StrategyMismatch { expected: strategy_id, found: snap.strategy_id });
    }
    Ok(Some(snap))
}

/// Tulis ke file sementara lalu rename, supaya pembaca tidak pernah melihat file setengah jadi.
pub async fn save(path: impl AsRef<Path>, snap: &Snapshot) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    let shown = || path.display().to_string();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(|source| SnapshotError::Io { path: shown(), source })?;
        }
    }
    let tmp = path.with_extension("tmp");
    let body = snap.to_json_string()?;
    fs::write(&tmp, body).await.map_err(|source| SnapshotError::Io { path: tmp.display().to_string(), source })?;
    fs::rename(&tmp, path).await.map_err(|source| SnapshotError::Io { path: shown(), source })?;
    Ok(())
}

/// Persistence task. Strategy pushes snapshots without waiting; the last one wins.
pub async fn run(mut rx: mpsc::UnboundedReceiver<Snapshot>, path: String) {
    info!(%path, "snapshot writer started");
    while let Some(mut snap) = rx.recv().await {
        // burst -> cukup tulis yang terakhir
        while let Ok(newer) = rx.try_recv() {
            snap = newer;
        }
        match save(&path, &snap).await {
            Ok(()) => info!(
                %path,
                origin = snap.spread_origin,
                leg1_passive = snap.leg1.passive,
                leg2_aggressive = snap.leg2.aggressive,
                "snapshot saved"
            ),
            Err(e) => error!(%e, "snapshot save failed"),
        }
    }
    info!("snapshot writer stopped");
}
