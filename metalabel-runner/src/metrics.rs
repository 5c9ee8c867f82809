//! Performance statistics: pure functions over returns, ledgers and
//! position traces.
//!
//! Degenerate denominators never raise: profit factor is 0 when there are no
//! losing returns and win rate is 0 on an empty sample.

use serde::{Deserialize, Serialize};

use metalabel_core::domain::{CandidateSet, CandleSeries};

use crate::fees::CostModel;
use crate::walk_forward::StreamTrace;

// ─── Scalar metrics ─────────────────────────────────────────────────

/// Sum of positive returns over the absolute sum of negative returns.
pub fn profit_factor(returns: &[f64]) -> f64 {
    let wins: f64 = returns.iter().filter(|&&r| r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r.abs()).sum();
    if losses > 0.0 {
        wins / losses
    } else {
        0.0
    }
}

/// Fraction of strictly positive returns.
pub fn win_rate(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().filter(|&&r| r > 0.0).count() as f64 / returns.len() as f64
}

pub fn mean(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().sum::<f64>() / returns.len() as f64
}

// ─── Trade-level ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub count: usize,
    pub profit_factor: f64,
    pub win_rate: f64,
    pub avg_return: f64,
}

impl TradeStats {
    pub fn from_returns(returns: &[f64]) -> Self {
        Self {
            count: returns.len(),
            profit_factor: profit_factor(returns),
            win_rate: win_rate(returns),
            avg_return: mean(returns),
        }
    }
}

/// Returns of the scored, closed candidates whose probability is at least
/// `min_probability` (pass 0.0 for all of them), net of `cost`.
pub fn scored_returns(set: &CandidateSet, min_probability: f64, cost: &CostModel) -> Vec<f64> {
    set.scored()
        .filter(|c| c.model_probability.is_some_and(|p| p >= min_probability))
        .filter_map(|c| c.log_return())
        .map(|r| cost.net_return(r))
        .collect()
}

// ─── Bar-level ──────────────────────────────────────────────────────

/// Per-bar strategy returns: the next bar's log return times the position
/// held on this bar. The final bar has no next return and contributes 0.
pub fn bar_returns(series: &CandleSeries, positions: &[u8]) -> Vec<f64> {
    positions
        .iter()
        .enumerate()
        .map(|(i, &pos)| {
            let next = series.next_log_return(i).unwrap_or(0.0);
            next * f64::from(pos)
        })
        .collect()
}

/// Fraction of bars with an open position.
pub fn time_in_market(positions: &[u8]) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }
    positions.iter().filter(|&&p| p > 0).count() as f64 / positions.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub profit_factor: f64,
    pub time_in_market: f64,
    pub trades: usize,
}

impl StreamStats {
    pub fn compute(series: &CandleSeries, trace: &StreamTrace) -> Self {
        Self {
            profit_factor: profit_factor(&bar_returns(series, &trace.positions)),
            time_in_market: time_in_market(&trace.positions),
            trades: trace.entered.len(),
        }
    }
}

// ─── Fee impact ─────────────────────────────────────────────────────

/// Viability of the filtered stream after costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Viable,
    Marginal,
    NotViable,
}

impl Verdict {
    pub fn from_net_profit_factor(pf: f64) -> Self {
        if pf > 1.05 {
            Verdict::Viable
        } else if pf > 1.0 {
            Verdict::Marginal
        } else {
            Verdict::NotViable
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verdict::Viable => "viable",
            Verdict::Marginal => "marginal",
            Verdict::NotViable => "not viable",
        };
        f.write_str(s)
    }
}

/// Gross versus net trade-level profit factor for both streams.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeImpact {
    pub gross_baseline_pf: f64,
    pub net_baseline_pf: f64,
    pub gross_filtered_pf: f64,
    pub net_filtered_pf: f64,
    pub net_filtered_win_rate: f64,
    pub verdict: Verdict,
}

impl FeeImpact {
    pub fn compute(set: &CandidateSet, threshold: f64, cost: &CostModel) -> Self {
        let gross_all = scored_returns(set, 0.0, &CostModel::ZERO);
        let net_all = scored_returns(set, 0.0, cost);
        let gross_filtered = scored_returns(set, threshold, &CostModel::ZERO);
        let net_filtered = scored_returns(set, threshold, cost);
        let net_filtered_pf = profit_factor(&net_filtered);
        Self {
            gross_baseline_pf: profit_factor(&gross_all),
            net_baseline_pf: profit_factor(&net_all),
            gross_filtered_pf: profit_factor(&gross_filtered),
            net_filtered_pf,
            net_filtered_win_rate: win_rate(&net_filtered),
            verdict: Verdict::from_net_profit_factor(net_filtered_pf),
        }
    }
}

// ─── Instrument report ──────────────────────────────────────────────

/// Everything reported for one instrument after walk-forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentReport {
    pub instrument: String,
    pub threshold: f64,
    /// All scored trades (what the ungated detector would have taken).
    pub all_trades: TradeStats,
    /// Scored trades at or above the threshold.
    pub filtered_trades: TradeStats,
    pub baseline_bars: StreamStats,
    pub filtered_bars: StreamStats,
    pub fee_impact: FeeImpact,
}

impl InstrumentReport {
    pub fn compute(
        series: &CandleSeries,
        ledger: &CandidateSet,
        baseline: &StreamTrace,
        filtered: &StreamTrace,
        threshold: f64,
        cost: &CostModel,
    ) -> Self {
        Self {
            instrument: ledger.instrument.clone(),
            threshold,
            all_trades: TradeStats::from_returns(&scored_returns(ledger, 0.0, &CostModel::ZERO)),
            filtered_trades: TradeStats::from_returns(&scored_returns(ledger, threshold, &CostModel::ZERO)),
            baseline_bars: StreamStats::compute(series, baseline),
            filtered_bars: StreamStats::compute(series, filtered),
            fee_impact: FeeImpact::compute(ledger, threshold, cost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use metalabel_core::domain::Candle;

    const EPS: f64 = 1e-12;

    #[test]
    fn profit_factor_basic() {
        assert!((profit_factor(&[0.02, -0.01, 0.01, -0.01]) - 1.5).abs() < EPS);
    }

    #[test]
    fn profit_factor_without_losses_is_zero() {
        assert_eq!(profit_factor(&[0.01, 0.02]), 0.0);
        assert_eq!(profit_factor(&[]), 0.0);
    }

    #[test]
    fn win_rate_and_mean() {
        assert_eq!(win_rate(&[]), 0.0);
        assert!((win_rate(&[0.1, -0.1, 0.0, 0.2]) - 0.5).abs() < EPS);
        assert!((mean(&[0.1, -0.1, 0.3]) - 0.1).abs() < EPS);
    }

    #[test]
    fn verdict_bands() {
        assert_eq!(Verdict::from_net_profit_factor(1.2), Verdict::Viable);
        assert_eq!(Verdict::from_net_profit_factor(1.05), Verdict::Marginal);
        assert_eq!(Verdict::from_net_profit_factor(1.01), Verdict::Marginal);
        assert_eq!(Verdict::from_net_profit_factor(1.0), Verdict::NotViable);
        assert_eq!(Verdict::from_net_profit_factor(0.0), Verdict::NotViable);
    }

    fn series(closes: &[f64]) -> CandleSeries {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(base + Duration::hours(i as i64), c, c, c, c, 1.0))
            .collect();
        CandleSeries::new("T", candles).unwrap()
    }

    #[test]
    fn bar_returns_use_next_bar() {
        let s = series(&[100.0, 110.0, 99.0, 99.0]);
        let r = bar_returns(&s, &[1, 1, 0, 1]);
        assert!((r[0] - (110.0f64 / 100.0).ln()).abs() < EPS);
        assert!((r[1] - (99.0f64 / 110.0).ln()).abs() < EPS);
        assert_eq!(r[2], 0.0);
        assert_eq!(r[3], 0.0);
        assert!((time_in_market(&[1, 1, 0, 1]) - 0.75).abs() < EPS);
    }
}
