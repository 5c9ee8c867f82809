//! Metalabel Runner: walk-forward evaluation, pooling, fees, money management.
//!
//! This crate builds on `metalabel-core` to provide:
//! - TOML run configuration and CSV data loading
//! - Single-series walk-forward with periodic retraining
//! - Pooled multi-series walk-forward (one model trained across instruments)
//! - Static fee model and account-balance simulation
//! - Trade- and bar-level statistics, threshold sweep, raw parameter grid
//! - The end-to-end pipeline and artifact export

pub mod account;
pub mod config;
pub mod data_loader;
pub mod export;
pub mod fees;
pub mod grid;
pub mod metrics;
pub mod multi_series;
pub mod pipeline;
pub mod threshold;
pub mod walk_forward;

pub use account::{AccountError, AccountParams, AccountSimulation, AccountSimulator, AccountSnapshot, AccountSummary};
pub use config::{ConfigError, InstrumentSource, RunConfig, RunId};
pub use data_loader::{load_csv, read_candles, LoadError};
pub use fees::{apply_fees, cost_for, default_cost_table, CostModel, CostTable, NetTrade};
pub use grid::{run_grid, GridRow, GridSpec};
pub use metrics::{FeeImpact, InstrumentReport, StreamStats, TradeStats, Verdict};
pub use multi_series::{run_pooled, InstrumentInput, PooledCheckpoint, PooledResult};
pub use pipeline::{run_on_series, run_pipeline, PipelineError, PipelineOutput, RunSummary};
pub use threshold::{sweep_candidates, ThresholdSweep, ThresholdTable};
pub use walk_forward::{
    run_walk_forward, score_with_model, CheckpointReport, StreamTrace, WalkForwardError,
    WalkForwardParams, WalkForwardResult,
};
