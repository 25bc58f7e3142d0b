// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : pair_arb_bot - two-leg futures spread arbitrage engine in Rust
Module  : config.rs
Version : 0.5.0
License : MIT (see LICENSE)

Summary : Quotes the primary leg passively around an EWMA spread, hedges
          passive fills aggressively on the secondary leg with a retry
          ladder, liquidates on risk breaches, persists positions across
          restarts, exposes Prometheus metrics, and records JSONL events.
=============================================================================
*/
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{Px, Qty};
use crate::execution_state::FeeSchedule;
use crate::thresholds::{ThresholdLoadError, ThresholdSet};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("env {key}={value:?} is not valid")]
    Invalid { key: String, value: String },
    #[error("{key}: {source}")]
    Thresholds { key: String, source: ThresholdLoadError },
}

/// Static description of one leg.
#[derive(Debug, Clone)]
pub struct LegConfig {
    pub symbol: String,
    pub tick_size: Px,
    pub lot_size: Qty,
    pub price_multiplier: f64,
    pub fees: FeeSchedule,
    pub thresholds_file: Option<String>,
    pub thresholds: ThresholdSet,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub strategy_id: u32,
    pub exchange: String,
    pub leg1: LegConfig,
    pub leg2: LegConfig,
    pub send_in_lots: bool,
    pub max_quote_level: Option<usize>,
    pub use_invisible_book: bool,
    pub auto_activate: bool,

    // files/metrics
    pub snapshot_file: String,
    pub record_file: Option<String>,
    pub metrics_port: u16,

    // mock venue + feed
    pub mock_fill_ms: u64,
    pub mock_fill_prob: f64,
    pub mock_start_px: Px,
    pub mock_spread_ticks: i64,
    pub mock_interval_ms: u64,
}

/// Env lookup with a default; a present but unparsable value is an error.
fn var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key: key.to_string(), value: raw }),
    }
}

/// Float env value; NaN and infinities are refused.
fn real(get: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> Result<f64, ConfigError> {
    let v: f64 = var(get, key, default)?;
    if !v.is_finite() {
        return Err(ConfigError::Invalid { key: key.to_string(), value: v.to_string() });
    }
    Ok(v)
}

fn flag(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool, ConfigError> {
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key: key.to_string(), value: v }),
        },
    }
}

fn leg(get: &impl Fn(&str) -> Option<String>, n: u8, default_symbol: &str) -> Result<LegConfig, ConfigError> {
    let key = |k: &str| format!("{k}{n}");
    let symbol = get(&key("SYMBOL")).filter(|s| !s.trim().is_empty()).unwrap_or_else(|| default_symbol.to_string());
    let per_contract = real(get, &key("FEE_PER_CONTRACT"), 0.0)?;
    let fees = FeeSchedule {
        buy_rate: real(get, &key("BUY_FEE_RATE"), 0.0)?,
        sell_rate: real(get, &key("SELL_FEE_RATE"), 0.0)?,
        buy_per_contract: per_contract,
        sell_per_contract: per_contract,
    };

    // file kosong / tidak diset -> default
    let thresholds_file = get(&format!("THRESHOLDS{n}_FILE")).filter(|s| !s.trim().is_empty());
    let thresholds = match &thresholds_file {
        Some(path) => ThresholdSet::load(path)
            .map_err(|source| ConfigError::Thresholds { key: format!("THRESHOLDS{n}_FILE"), source })?,
        None => ThresholdSet::default(),
    };

    Ok(LegConfig {
        symbol,
        tick_size: var(get, &key("TICK_SIZE"), 1)?,
        lot_size: var(get, &key("LOT_SIZE"), 1)?,
        price_multiplier: real(get, &key("PRICE_MULTIPLIER"), 1.0)?,
        fees,
        thresholds_file,
        thresholds,
    })
}

/// Build the config from any key lookup (env in production, a map in tests).
pub fn load_from(get: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
    let max_quote_level: usize = var(&get, "MAX_QUOTE_LEVEL", 0)?;
    let mock_fill_prob = real(&get, "MOCK_FILL_PROB", 0.05)?;
    if !(0.0..=1.0).contains(&mock_fill_prob) {
        return Err(ConfigError::Invalid { key: "MOCK_FILL_PROB".into(), value: mock_fill_prob.to_string() });
    }
    Ok(Config {
        strategy_id: var(&get, "STRATEGY_ID", 1)?,
        exchange: get("EXCHANGE").unwrap_or_else(|| "SHFE".to_string()),
        leg1: leg(&get, 1, "ag2603")?,
        leg2: leg(&get, 2, "ag2604")?,
        send_in_lots: flag(&get, "SEND_IN_LOTS", true)?,
        // 0 = pakai max_quote_level dari threshold leg 1
        max_quote_level: (max_quote_level > 0).then_some(max_quote_level),
        use_invisible_book: flag(&get, "USE_INVISIBLE_BOOK", false)?,
        auto_activate: flag(&get, "AUTO_ACTIVATE", false)?,
        snapshot_file: get("SNAPSHOT_FILE").unwrap_or_else(|| "state/snapshot.json".to_string()),
        record_file: get("RECORD_FILE").filter(|s| !s.trim().is_empty()),
        metrics_port: var(&get, "METRICS_PORT", 9898)?,
        mock_fill_ms: var(&get, "MOCK_FILL_MS", 250)?,
        mock_fill_prob,
        mock_start_px: var(&get, "MOCK_START_PX", 5_000)?,
        mock_spread_ticks: var(&get, "MOCK_SPREAD_TICKS", 10)?,
        mock_interval_ms: var(&get, "MOCK_INTERVAL_MS", 100)?,
    })
}

pub fn load() -> Result<Config, ConfigError> {
    // Pastikan .env dibaca dulu
    let _ = dotenv();
    load_from(|k| env::var(k).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: AHashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = load_from(lookup(&[])).unwrap();
        assert_eq!(cfg.strategy_id, 1);
        assert_eq!(cfg.leg1.symbol, "ag2603");
        assert_eq!(cfg.leg2.symbol, "ag2604");
        assert_eq!(cfg.max_quote_level, None);
        assert!(cfg.send_in_lots);
        assert!(!cfg.auto_activate);
        assert_eq!(cfg.leg1.thresholds, ThresholdSet::default());
    }

    #[test]
    fn per_leg_keys_are_numbered() {
        let cfg = load_from(lookup(&[
            ("SYMBOL1", "rb2605"),
            ("TICK_SIZE2", "5"),
            ("SELL_FEE_RATE1", "0.0001"),
            ("FEE_PER_CONTRACT2", "1.5"),
            ("MAX_QUOTE_LEVEL", "2"),
            ("AUTO_ACTIVATE", "yes"),
        ]))
        .unwrap();
        assert_eq!(cfg.leg1.symbol, "rb2605");
        assert_eq!(cfg.leg2.tick_size, 5);
        assert_eq!(cfg.leg1.fees.sell_rate, 0.0001);
        assert_eq!(cfg.leg2.fees.buy_per_contract, 1.5);
        assert_eq!(cfg.max_quote_level, Some(2));
        assert!(cfg.auto_activate);
    }

    #[test]
    fn garbage_values_are_reported() {
        let err = load_from(lookup(&[("LOT_SIZE1", "ten")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "LOT_SIZE1"));
        assert!(load_from(lookup(&[("USE_INVISIBLE_BOOK", "maybe")])).is_err());
    }

    #[test]
    fn non_finite_and_out_of_range_floats_are_reported() {
        for (key, raw) in [("MOCK_FILL_PROB", "NaN"), ("MOCK_FILL_PROB", "1.5"), ("PRICE_MULTIPLIER2", "inf")] {
            let err = load_from(lookup(&[(key, raw)])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: ref k, .. } if k == key), "{key}={raw}");
        }
        assert_eq!(load_from(lookup(&[("MOCK_FILL_PROB", "1")])).unwrap().mock_fill_prob, 1.0);
    }

    #[test]
    fn threshold_files_are_loaded_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("t1.json");
        std::fs::write(&good, r#"{"begin_place": 2.0, "long_place": 3.0, "short_place": 1.0, "max_size": 4}"#).unwrap();
        let bad = dir.path().join("t2.json");
        std::fs::write(&bad, r#"{"begin_place": 2.0, "long_place": 1.0}"#).unwrap();

        let good = good.display().to_string();
        let cfg = load_from(lookup(&[("THRESHOLDS1_FILE", good.as_str())])).unwrap();
        assert_eq!(cfg.leg1.thresholds.max_size, 4);

        let bad = bad.display().to_string();
        let err = load_from(lookup(&[("THRESHOLDS2_FILE", bad.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::Thresholds { .. }));
    }
}
