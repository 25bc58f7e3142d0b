// ===============================
// src/control.rs
// ===============================
//
// Perintah operator (satu baris teks):
//   activate | deactivate | liquidate [agg] | offset <v> | reload <1|2> <file> | status
//
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::domain::LegId;
use crate::strategy::PairwiseArbStrategy;
use crate::thresholds::{ThresholdError, ThresholdLoadError, ThresholdSet};

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Activate,
    Deactivate,
    Liquidate { aggressive: bool },
    Offset(f64),
    Reload { leg: LegId, path: String },
    Status,
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("bad number {0:?}")]
    Number(String),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("{leg} reload refused: {source}")]
    Load { leg: LegId, source: ThresholdLoadError },
    #[error("{leg} reload refused: {source}")]
    Rejected { leg: LegId, source: ThresholdError },
}

impl FromStr for ControlCommand {
    type Err = ControlParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else { return Err(ControlParseError::Empty) };
        let args: Vec<&str> = parts.collect();
        match (cmd.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("activate", []) => Ok(ControlCommand::Activate),
            ("deactivate", []) => Ok(ControlCommand::Deactivate),
            ("liquidate", []) => Ok(ControlCommand::Liquidate { aggressive: false }),
            ("liquidate", ["agg" | "aggressive"]) => Ok(ControlCommand::Liquidate { aggressive: true }),
            ("liquidate", _) => Err(ControlParseError::Usage("liquidate [agg]")),
            ("offset", [v]) => v
                .parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(ControlCommand::Offset)
                .ok_or_else(|| ControlParseError::Number(v.to_string())),
            ("offset", _) => Err(ControlParseError::Usage("offset <value>")),
            ("reload", [leg, path]) => {
                let leg = match *leg {
                    "1" => LegId::Leg1,
                    "2" => LegId::Leg2,
                    _ => return Err(ControlParseError::Usage("reload <1|2> <file>")),
                };
                Ok(ControlCommand::Reload { leg, path: path.to_string() })
            }
            ("reload", _) => Err(ControlParseError::Usage("reload <1|2> <file>")),
            ("status", []) => Ok(ControlCommand::Status),
            (other, _) => Err(ControlParseError::Unknown(other.to_string())),
        }
    }
}

/// Apply one command. Returns a human-readable result line.
pub fn apply(strat: &PairwiseArbStrategy, cmd: ControlCommand) -> Result<String, ControlError> {
    let out = match cmd {
        ControlCommand::Activate => {
            strat.activate();
            format!("mode={}", strat.mode().label())
        }
        ControlCommand::Deactivate => {
            strat.deactivate();
            format!("mode={}", strat.mode().label())
        }
        ControlCommand::Liquidate { aggressive } => {
            strat.liquidate(aggressive);
            format!("mode={}", strat.mode().label())
        }
        ControlCommand::Offset(v) => {
            strat.set_external_offset(v);
            format!("offset={v}")
        }
        ControlCommand::Reload { leg, path } => {
            // file dibaca di luar lock strategi
            let set = ThresholdSet::load(&path).map_err(|source| ControlError::Load { leg, source })?;
            strat.reload_thresholds(leg, set).map_err(|source| ControlError::Rejected { leg, source })?;
            format!("{leg} thresholds reloaded from {path}")
        }
        ControlCommand::Status => {
            serde_json::to_string(&strat.status()).unwrap_or_else(|e| format!("status encode failed: {e}"))
        }
    };
    Ok(out)
}

pub async fn run(mut rx: mpsc::Receiver<ControlCommand>, strat: Arc<PairwiseArbStrategy>) {
    info!("control: started");
    while let Some(cmd) = rx.recv().await {
        let label = format!("{cmd:?}");
        match apply(&strat, cmd) {
            Ok(out) => info!(cmd = %label, result = %out, "control"),
            Err(e) => warn!(cmd = %label, %e, "control"),
        }
    }
    info!("control: channel closed, stopped");
}
