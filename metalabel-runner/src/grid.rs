//! Raw-edge parameter grid for the trendline breakout rule.
//!
//! No features, no model: every `(lookback, hold, tp, sl)` combination is
//! replayed with the breakout entry and the shared exit priority, and the
//! resulting log returns are summarised. The resistance series for each
//! lookback is fitted once and shared by all combinations using it.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use metalabel_core::candidates::trendline_breakout::resistance_at;
use metalabel_core::candidates::{GenerateError, TrendlineBreakoutParams};
use metalabel_core::domain::CandleSeries;
use metalabel_core::indicators::{Atr, Indicator};
use metalabel_core::trendline::TrendlineFitter;

use crate::metrics::TradeStats;

/// Combinations with fewer closed trades are not reported.
pub const MIN_GRID_TRADES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub lookbacks: Vec<usize>,
    pub hold_periods: Vec<usize>,
    pub tp_multiples: Vec<f64>,
    pub sl_multiples: Vec<f64>,
    pub atr_lookback: usize,
    pub min_trades: usize,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            lookbacks: vec![48, 72, 96, 120],
            hold_periods: vec![12, 24, 48, 72],
            tp_multiples: vec![1.5, 2.0, 3.0],
            sl_multiples: vec![1.0, 1.5, 2.0, 3.0],
            atr_lookback: 168,
            min_trades: MIN_GRID_TRADES,
        }
    }
}

impl GridSpec {
    /// Number of combinations.
    pub fn size(&self) -> usize {
        self.lookbacks.len() * self.hold_periods.len() * self.tp_multiples.len() * self.sl_multiples.len()
    }

    /// Every combination as generator parameters, lookback-major.
    pub fn combinations(&self) -> Vec<TrendlineBreakoutParams> {
        let mut out = Vec::with_capacity(self.size());
        for &lookback in &self.lookbacks {
            for &hold_period in &self.hold_periods {
                for &tp_multiple in &self.tp_multiples {
                    for &sl_multiple in &self.sl_multiples {
                        out.push(TrendlineBreakoutParams {
                            lookback,
                            hold_period,
                            tp_multiple,
                            sl_multiple,
                            atr_lookback: self.atr_lookback,
                        });
                    }
                }
            }
        }
        out
    }

    pub fn validate(&self) -> Result<(), GenerateError> {
        self.combinations().iter().try_for_each(TrendlineBreakoutParams::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridRow {
    pub lookback: usize,
    pub hold_period: usize,
    pub tp_multiple: f64,
    pub sl_multiple: f64,
    pub profit_factor: f64,
    pub win_rate: f64,
    pub avg_return: f64,
    pub count: usize,
}

/// Extrapolated resistance at every index from `atr_lookback` on; `NaN` before.
fn resistance_series(
    fitter: &dyn TrendlineFitter,
    log_close: &[f64],
    lookback: usize,
    atr_lookback: usize,
) -> Result<Vec<f64>, GenerateError> {
    let mut out = vec![f64::NAN; log_close.len()];
    for (i, slot) in out.iter_mut().enumerate().skip(atr_lookback) {
        *slot = resistance_at(fitter, log_close, i, lookback)?.1;
    }
    Ok(out)
}

/// Closed-trade log returns of one combination.
fn replay(log_close: &[f64], atr: &[f64], resistance: &[f64], p: &TrendlineBreakoutParams) -> Vec<f64> {
    struct Open {
        entry: f64,
        take_profit: f64,
        stop_loss: f64,
        deadline: usize,
    }

    let mut returns = Vec::new();
    let mut open: Option<Open> = None;
    for i in p.atr_lookback..log_close.len() {
        let close = log_close[i];
        if open.is_none() && atr[i].is_finite() && atr[i] > 0.0 && close > resistance[i] {
            open = Some(Open {
                entry: close,
                take_profit: close + atr[i] * p.tp_multiple,
                stop_loss: close - atr[i] * p.sl_multiple,
                deadline: i + p.hold_period,
            });
        }
        if let Some(t) = &open {
            if close >= t.take_profit || close <= t.stop_loss || i >= t.deadline {
                returns.push(close - t.entry);
                open = None;
            }
        }
    }
    returns
}

/// Evaluate every combination of `spec` on `series`, best profit factor first.
pub fn run_grid(
    series: &CandleSeries,
    spec: &GridSpec,
    fitter: &dyn TrendlineFitter,
) -> Result<Vec<GridRow>, GenerateError> {
    spec.validate()?;
    let log_close = series.log_closes();
    let atr = Atr::new(spec.atr_lookback).compute(&series.log_candles());

    let resistances = spec
        .lookbacks
        .par_iter()
        .map(|&lb| resistance_series(fitter, log_close, lb, spec.atr_lookback).map(|r| (lb, r)))
        .collect::<Result<Vec<_>, _>>()?;

    let combos = spec.combinations();
    info!(
        instrument = series.instrument(),
        combinations = combos.len(),
        "running parameter grid"
    );

    let mut rows: Vec<GridRow> = combos
        .par_iter()
        .filter_map(|p| {
            let (_, resistance) = resistances.iter().find(|(lb, _)| *lb == p.lookback)?;
            let returns = replay(log_close, &atr, resistance, p);
            if returns.len() < spec.min_trades {
                return None;
            }
            let stats = TradeStats::from_returns(&returns);
            Some(GridRow {
                lookback: p.lookback,
                hold_period: p.hold_period,
                tp_multiple: p.tp_multiple,
                sl_multiple: p.sl_multiple,
                profit_factor: stats.profit_factor,
                win_rate: stats.win_rate,
                avg_return: stats.avg_return,
                count: stats.count,
            })
        })
        .collect();

    rows.sort_by(|a, b| b.profit_factor.total_cmp(&a.profit_factor));
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use metalabel_core::candidates::{CandidateGenerator, TrendlineBreakout};
    use metalabel_core::domain::Candle;
    use metalabel_core::trendline::PivotTrendlineFitter;

    fn wavy_series(n: usize) -> CandleSeries {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = (0..n)
            .map(|i| {
                let x = i as f64;
                let c = 100.0 * (0.0004 * x + 0.03 * (x / 7.0).sin() + 0.01 * (x / 3.0).cos()).exp();
                Candle::new(base + Duration::hours(i as i64), c, c * 1.005, c * 0.995, c, 1000.0)
            })
            .collect();
        CandleSeries::new("WAVE", candles).unwrap()
    }

    fn small_spec() -> GridSpec {
        GridSpec {
            lookbacks: vec![8, 12],
            hold_periods: vec![4, 8],
            tp_multiples: vec![1.0, 2.0],
            sl_multiples: vec![1.0],
            atr_lookback: 24,
            min_trades: 1,
        }
    }

    #[test]
    fn combinations_cover_grid() {
        let spec = GridSpec::default();
        assert_eq!(spec.size(), 4 * 4 * 3 * 4);
        let combos = spec.combinations();
        assert_eq!(combos.len(), spec.size());
        assert_eq!(combos[0].lookback, 48);
        assert_eq!(combos[combos.len() - 1].lookback, 120);
    }

    #[test]
    fn invalid_spec_rejected() {
        let mut spec = small_spec();
        spec.lookbacks.push(30);
        assert!(matches!(
            run_grid(&wavy_series(100), &spec, &PivotTrendlineFitter),
            Err(GenerateError::AtrLookbackTooShort { .. })
        ));
    }

    #[test]
    fn agrees_with_generator() {
        let series = wavy_series(600);
        let rows = run_grid(&series, &small_spec(), &PivotTrendlineFitter).unwrap();
        assert!(!rows.is_empty());

        for row in &rows {
            let params = TrendlineBreakoutParams {
                lookback: row.lookback,
                hold_period: row.hold_period,
                tp_multiple: row.tp_multiple,
                sl_multiple: row.sl_multiple,
                atr_lookback: 24,
            };
            let set = TrendlineBreakout::new(params).unwrap().generate(&series).unwrap();
            let returns: Vec<f64> = set.closed().filter_map(|c| c.log_return()).collect();
            let stats = TradeStats::from_returns(&returns);
            assert_eq!(row.count, stats.count);
            assert!((row.profit_factor - stats.profit_factor).abs() < 1e-12);
        }
    }

    #[test]
    fn sorted_by_profit_factor_and_filtered() {
        let series = wavy_series(600);
        let mut spec = small_spec();
        let rows = run_grid(&series, &spec, &PivotTrendlineFitter).unwrap();
        assert!(rows.windows(2).all(|w| w[0].profit_factor >= w[1].profit_factor));

        spec.min_trades = usize::MAX;
        assert!(run_grid(&series, &spec, &PivotTrendlineFitter).unwrap().is_empty());
    }
}
