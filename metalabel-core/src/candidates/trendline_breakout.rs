//! Trendline breakout detector.
//!
//! At every index i (from `atr_lookback` on) a resistance line is fitted to
//! the `lookback` log closes strictly before i and extrapolated to i. A close
//! above the extrapolated value opens a long trade with ATR-scaled bounds.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::lifecycle::{EntryPlan, Ledger};
use super::{check_multiple, CandidateGenerator, GenerateError};
use crate::domain::{CandidateSet, CandleSeries, Trendline};
use crate::indicators::{BankParams, IndicatorBank, IndicatorSnapshot};
use crate::trendline::{PivotTrendlineFitter, TrendlineFitter};

/// Feature columns, in vector order.
pub const FEATURE_NAMES: [&str; 17] = [
    "resist_slope",
    "fit_error",
    "max_distance",
    "volume_ratio",
    "adx",
    "breakout_size",
    "touch_count",
    "hour_sin",
    "hour_cos",
    "dow_sin",
    "dow_cos",
    "ret_short",
    "ret_long",
    "trend_fast",
    "trend_slow",
    "vol_regime",
    "range_position",
];

/// Fraction of ATR within which a window point counts as touching the line.
const TOUCH_TOLERANCE_ATR: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendlineBreakoutParams {
    pub lookback: usize,
    pub hold_period: usize,
    pub tp_multiple: f64,
    pub sl_multiple: f64,
    pub atr_lookback: usize,
}

impl Default for TrendlineBreakoutParams {
    fn default() -> Self {
        Self {
            lookback: 72,
            hold_period: 24,
            tp_multiple: 3.0,
            sl_multiple: 3.0,
            atr_lookback: 168,
        }
    }
}

impl TrendlineBreakoutParams {
    pub fn validate(&self) -> Result<(), GenerateError> {
        if self.lookback < 2 {
            return Err(GenerateError::LookbackTooShort(self.lookback));
        }
        if self.atr_lookback < self.lookback {
            return Err(GenerateError::AtrLookbackTooShort {
                atr_lookback: self.atr_lookback,
                lookback: self.lookback,
            });
        }
        if self.hold_period == 0 {
            return Err(GenerateError::ZeroHoldPeriod);
        }
        check_multiple("tp_multiple", self.tp_multiple)?;
        check_multiple("sl_multiple", self.sl_multiple)
    }
}

pub struct TrendlineBreakout {
    params: TrendlineBreakoutParams,
    fitter: Box<dyn TrendlineFitter>,
    name: String,
}

impl std::fmt::Debug for TrendlineBreakout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendlineBreakout")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl TrendlineBreakout {
    pub fn new(params: TrendlineBreakoutParams) -> Result<Self, GenerateError> {
        Self::with_fitter(params, Box::new(PivotTrendlineFitter))
    }

    pub fn with_fitter(
        params: TrendlineBreakoutParams,
        fitter: Box<dyn TrendlineFitter>,
    ) -> Result<Self, GenerateError> {
        params.validate()?;
        let name = format!("trendline_breakout_{}", params.lookback);
        Ok(Self {
            params,
            fitter,
            name,
        })
    }

    pub fn params(&self) -> &TrendlineBreakoutParams {
        &self.params
    }

    fn features(
        &self,
        window: &[f64],
        line: Trendline,
        resistance: f64,
        log_close: f64,
        snap: &IndicatorSnapshot,
    ) -> Vec<f64> {
        let atr = snap.atr;
        let lookback = window.len() as f64;
        let diffs: Vec<f64> = window
            .iter()
            .enumerate()
            .map(|(k, &v)| line.value_at(k as f64) - v)
            .collect();
        let mean_diff = diffs.iter().sum::<f64>() / lookback;
        let max_diff = diffs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let touches = diffs
            .iter()
            .filter(|d| d.abs() < atr * TOUCH_TOLERANCE_ATR)
            .count();

        vec![
            line.slope / atr,
            mean_diff / atr,
            max_diff / atr,
            snap.volume_ratio,
            snap.adx,
            (log_close - resistance) / atr,
            touches as f64,
            snap.hour_sin,
            snap.hour_cos,
            snap.dow_sin,
            snap.dow_cos,
            snap.ret_short_or_zero(),
            snap.ret_long_or_zero(),
            snap.trend_fast(),
            snap.trend_slow(),
            snap.vol_regime(),
            snap.range_position_or_mid(),
        ]
    }
}

/// Fitted resistance line for the `lookback` closes before `index`, and its
/// value extrapolated to `index`.
pub fn resistance_at(
    fitter: &dyn TrendlineFitter,
    log_close: &[f64],
    index: usize,
    lookback: usize,
) -> Result<(Trendline, f64), GenerateError> {
    let window = &log_close[index - lookback..index];
    let line = fitter
        .fit_resistance(window)
        .map_err(|source| GenerateError::Trendline { index, source })?;
    Ok((line, line.value_at(lookback as f64)))
}

impl CandidateGenerator for TrendlineBreakout {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.params.atr_lookback
    }

    fn feature_names(&self) -> Vec<String> {
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn generate(&self, series: &CandleSeries) -> Result<CandidateSet, GenerateError> {
        let p = &self.params;
        let bank = IndicatorBank::build(series, BankParams::trendline(p.lookback, p.atr_lookback));
        let log_close = series.log_closes();
        let candles = series.candles();
        let mut ledger = Ledger::new(CandidateSet::new(series.instrument(), self.feature_names()));

        for i in p.atr_lookback..series.len() {
            let time = candles[i].timestamp;
            if ledger.is_flat() {
                let (line, resistance) = resistance_at(self.fitter.as_ref(), log_close, i, p.lookback)?;
                let snap = bank.snapshot(i);
                let atr_ok = snap.atr.is_finite() && snap.atr > 0.0;
                if atr_ok && log_close[i] > resistance {
                    let window = &log_close[i - p.lookback..i];
                    let features = self.features(window, line, resistance, log_close[i], &snap);
                    ledger.open(EntryPlan {
                        index: i,
                        time,
                        log_price: log_close[i],
                        atr: snap.atr,
                        tp_multiple: p.tp_multiple,
                        sl_multiple: p.sl_multiple,
                        hold_period: p.hold_period,
                        trendline: Some(line),
                        features,
                    });
                }
            }
            ledger.check_exit(i, time, log_close[i]);
        }

        let set = ledger.finish();
        debug!(
            generator = %self.name,
            instrument = series.instrument(),
            candidates = set.len(),
            "trendline breakout scan complete"
        );
        Ok(set)
    }
}
