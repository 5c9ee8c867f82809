//! Probability thresholds: the per-instrument gate table and the sweep that
//! picks a gate from a scored ledger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use metalabel_core::domain::CandidateSet;

use crate::metrics::TradeStats;

/// Global default cutoff with optional per-instrument overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    pub default: f64,
    pub overrides: BTreeMap<String, f64>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            default: 0.5,
            overrides: BTreeMap::new(),
        }
    }
}

impl ThresholdTable {
    pub fn new(default: f64, overrides: BTreeMap<String, f64>) -> Self {
        Self { default, overrides }
    }

    pub fn for_instrument(&self, instrument: &str) -> f64 {
        self.overrides.get(instrument).copied().unwrap_or(self.default)
    }
}

// ─── Sweep ───────────────────────────────────────────────────────────

/// Rows with fewer passing trades are not reported.
pub const MIN_ROW_TRADES: usize = 10;
/// Floor on the trade count of the chosen row.
pub const MIN_BEST_TRADES: usize = 20;
/// Fraction of scored trades the chosen row must keep.
pub const MIN_BEST_FRACTION: f64 = 0.20;
/// Returned when no row qualifies.
pub const FALLBACK_THRESHOLD: f64 = 0.5;

/// Candidate cutoffs 0.30, 0.32, …, 0.70.
pub fn sweep_grid() -> Vec<f64> {
    (0..=20).map(|k| f64::from(30 + 2 * k) / 100.0).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub threshold: f64,
    pub profit_factor: f64,
    pub win_rate: f64,
    pub avg_return: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSweep {
    pub rows: Vec<ThresholdRow>,
    pub best_threshold: f64,
    pub best_profit_factor: f64,
    /// Minimum trade count a row needed to be eligible as best.
    pub min_trades: usize,
}

/// Sweep over `(probability, return)` pairs of scored, closed trades.
pub fn sweep(scored: &[(f64, f64)]) -> ThresholdSweep {
    let min_trades = MIN_BEST_TRADES.max((scored.len() as f64 * MIN_BEST_FRACTION) as usize);
    let mut rows = Vec::new();
    let mut best_threshold = FALLBACK_THRESHOLD;
    let mut best_profit_factor = 0.0;

    for threshold in sweep_grid() {
        let returns: Vec<f64> = scored
            .iter()
            .filter(|(p, _)| *p >= threshold)
            .map(|(_, r)| *r)
            .collect();
        if returns.len() < MIN_ROW_TRADES {
            continue;
        }
        let stats = TradeStats::from_returns(&returns);
        if stats.count >= min_trades && stats.profit_factor > best_profit_factor {
            best_profit_factor = stats.profit_factor;
            best_threshold = threshold;
        }
        rows.push(ThresholdRow {
            threshold,
            profit_factor: stats.profit_factor,
            win_rate: stats.win_rate,
            avg_return: stats.avg_return,
            count: stats.count,
        });
    }

    ThresholdSweep {
        rows,
        best_threshold,
        best_profit_factor,
        min_trades,
    }
}

/// Sweep the scored, closed candidates of one instrument on gross returns.
pub fn sweep_candidates(set: &CandidateSet) -> ThresholdSweep {
    let scored: Vec<(f64, f64)> = set
        .scored()
        .filter_map(|c| Some((c.model_probability?, c.log_return()?)))
        .collect();
    sweep(&scored)
}
