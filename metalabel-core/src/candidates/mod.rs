//! Candidate generators: rule-based detectors that emit the trade ledger.
//!
//! A generator streams once through a `CandleSeries`, opens at most one
//! trade at a time, freezes a feature vector at entry and closes the trade
//! with the shared exit rule (take-profit, then stop-loss, then deadline).
//! Two variants exist: trendline breakout and moving-average crossover.

pub mod lifecycle;
pub mod ma_crossover;
pub mod trendline_breakout;

pub use lifecycle::{EntryPlan, Ledger};
pub use ma_crossover::{MaCrossover, MaCrossoverParams};
pub use trendline_breakout::{TrendlineBreakout, TrendlineBreakoutParams};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CandidateSet, CandleSeries};
use crate::trendline::TrendlineError;

// ─── Error type ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerateError {
    #[error("atr_lookback ({atr_lookback}) must be >= lookback ({lookback})")]
    AtrLookbackTooShort { atr_lookback: usize, lookback: usize },
    #[error("lookback must be >= 2, got {0}")]
    LookbackTooShort(usize),
    #[error("hold_period must be >= 1")]
    ZeroHoldPeriod,
    #[error("{name} must be a positive finite number, got {value}")]
    NonPositiveMultiple { name: &'static str, value: f64 },
    #[error("moving-average periods must satisfy 1 <= fast < slow, got fast={fast}, slow={slow}")]
    InvalidMaPeriods { fast: usize, slow: usize },
    #[error("period '{name}' must be >= 1")]
    ZeroPeriod { name: &'static str },
    #[error("trendline fit failed at index {index}: {source}")]
    Trendline {
        index: usize,
        #[source]
        source: TrendlineError,
    },
}

// ─── Trait ───────────────────────────────────────────────────────────

/// A rule-based trade detector.
///
/// Generators never see a model or an account: the ledger they emit is a pure
/// function of the candles and the generator's parameters.
pub trait CandidateGenerator: Send + Sync {
    /// Human-readable name (e.g. "trendline_breakout_72").
    fn name(&self) -> &str;

    /// First index at which an entry can be detected.
    fn warmup(&self) -> usize;

    /// Column names of the frozen feature vector, in order.
    fn feature_names(&self) -> Vec<String>;

    fn generate(&self, series: &CandleSeries) -> Result<CandidateSet, GenerateError>;
}

pub(crate) fn check_multiple(name: &'static str, value: f64) -> Result<(), GenerateError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(GenerateError::NonPositiveMultiple { name, value })
    }
}

// ─── Factory ─────────────────────────────────────────────────────────

/// Serializable strategy selection, as it appears in a run file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    TrendlineBreakout(TrendlineBreakoutParams),
    MaCrossover(MaCrossoverParams),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::TrendlineBreakout(TrendlineBreakoutParams::default())
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<(), GenerateError> {
        match self {
            StrategyConfig::TrendlineBreakout(p) => p.validate(),
            StrategyConfig::MaCrossover(p) => p.validate(),
        }
    }

    /// Build the configured generator after validating its parameters.
    pub fn build(&self) -> Result<Box<dyn CandidateGenerator>, GenerateError> {
        match self {
            StrategyConfig::TrendlineBreakout(p) => Ok(Box::new(TrendlineBreakout::new(p.clone())?)),
            StrategyConfig::MaCrossover(p) => Ok(Box::new(MaCrossover::new(p.clone())?)),
        }
    }

    pub fn hold_period(&self) -> usize {
        match self {
            StrategyConfig::TrendlineBreakout(p) => p.hold_period,
            StrategyConfig::MaCrossover(p) => p.hold_period,
        }
    }
}
