// ===============================
// src/lib.rs
// ===============================
pub mod clock;
pub mod config;
pub mod control;
pub mod domain;
pub mod execution_state;
pub mod feed;
pub mod gateway;
pub mod instrument;
pub mod leg_manager;
pub mod metrics;
pub mod order_manager;
pub mod recorder;
pub mod risk;
pub mod snapshot;
pub mod spread_tracker;
pub mod strategy;
pub mod thresholds;
