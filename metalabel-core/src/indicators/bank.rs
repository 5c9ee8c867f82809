//! IndicatorBank: every rolling series a detector reads, computed once.
//!
//! The bank is built from a `CandleSeries` and read through `snapshot(i)`,
//! which returns all indicator values at one index as a single struct. Feature
//! code never indexes parallel arrays itself, so the columns cannot drift.

use serde::{Deserialize, Serialize};

use super::cyclical::{day_of_week_encoding, hour_encoding};
use super::{Adx, Atr, Indicator, PercentChange, RangePosition, Rsi, Sma, VolumeRatio};
use crate::domain::CandleSeries;

/// Price space the ATR is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSpace {
    /// ATR over log high/low/close: already a log-return distance.
    Log,
    /// ATR over raw prices: divide by close for a log-equivalent distance.
    Raw,
}

/// Windows for every series in the bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankParams {
    pub atr_period: usize,
    pub atr_slow_period: usize,
    pub atr_space: PriceSpace,
    pub adx_period: usize,
    pub volume_window: usize,
    pub ma_fast: usize,
    pub ma_slow: usize,
    pub ret_short: usize,
    pub ret_long: usize,
    pub range_window: usize,
    pub rsi_period: usize,
}

impl BankParams {
    /// Windows used by the trendline breakout detector.
    pub fn trendline(lookback: usize, atr_lookback: usize) -> Self {
        Self {
            atr_period: atr_lookback,
            atr_slow_period: 2 * atr_lookback,
            atr_space: PriceSpace::Log,
            adx_period: lookback,
            volume_window: atr_lookback,
            ma_fast: 50,
            ma_slow: 200,
            ret_short: 24,
            ret_long: 168,
            range_window: 168,
            rsi_period: 14,
        }
    }

    /// Windows used by the moving-average crossover detector.
    pub fn ma_crossover(fast: usize, slow: usize, atr_period: usize) -> Self {
        Self {
            atr_period,
            atr_slow_period: 2 * atr_period,
            atr_space: PriceSpace::Raw,
            adx_period: 14,
            volume_window: 50,
            ma_fast: fast,
            ma_slow: slow,
            ret_short: 24,
            ret_long: 168,
            range_window: 168,
            rsi_period: 14,
        }
    }
}

/// Indicator values at a single index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub atr: f64,
    pub atr_slow: f64,
    pub volume_ratio: f64,
    pub adx: f64,
    pub ma_fast: f64,
    pub ma_slow: f64,
    pub ret_short: f64,
    pub ret_long: f64,
    pub range_position: f64,
    pub rsi: f64,
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub dow_sin: f64,
    pub dow_cos: f64,
}

impl IndicatorSnapshot {
    /// (close - MA) / MA for the fast average; 0.0 when the MA is not positive.
    pub fn trend_fast(&self) -> f64 {
        relative_to(self.close, self.ma_fast)
    }

    /// (close - MA) / MA for the slow average; 0.0 when the MA is not positive.
    pub fn trend_slow(&self) -> f64 {
        relative_to(self.close, self.ma_slow)
    }

    /// Short ATR over slow ATR; 1.0 when the slow ATR is undefined or zero.
    pub fn vol_regime(&self) -> f64 {
        if self.atr_slow > 0.0 {
            self.atr / self.atr_slow
        } else {
            1.0
        }
    }

    /// Range position with the flat-range fallback of 0.5.
    pub fn range_position_or_mid(&self) -> f64 {
        if self.range_position.is_nan() {
            0.5
        } else {
            self.range_position
        }
    }

    /// Short return with undefined warm-up values read as 0.0.
    pub fn ret_short_or_zero(&self) -> f64 {
        nan_to_zero(self.ret_short)
    }

    pub fn ret_long_or_zero(&self) -> f64 {
        nan_to_zero(self.ret_long)
    }
}

fn relative_to(value: f64, base: f64) -> f64 {
    if base > 0.0 {
        (value - base) / base
    } else {
        0.0
    }
}

fn nan_to_zero(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v
    }
}

/// Precomputed indicator columns for one series.
#[derive(Debug, Clone)]
pub struct IndicatorBank {
    params: BankParams,
    close: Vec<f64>,
    atr: Vec<f64>,
    atr_slow: Vec<f64>,
    volume_ratio: Vec<f64>,
    adx: Vec<f64>,
    ma_fast: Vec<f64>,
    ma_slow: Vec<f64>,
    ret_short: Vec<f64>,
    ret_long: Vec<f64>,
    range_position: Vec<f64>,
    rsi: Vec<f64>,
    hour: Vec<(f64, f64)>,
    dow: Vec<(f64, f64)>,
}

impl IndicatorBank {
    pub fn build(series: &CandleSeries, params: BankParams) -> Self {
        let raw = series.candles();
        let atr_input = match params.atr_space {
            PriceSpace::Log => series.log_candles(),
            PriceSpace::Raw => raw.to_vec(),
        };

        Self {
            close: series.closes(),
            atr: Atr::new(params.atr_period).compute(&atr_input),
            atr_slow: Atr::new(params.atr_slow_period).compute(&atr_input),
            volume_ratio: VolumeRatio::new(params.volume_window).compute(raw),
            adx: Adx::new(params.adx_period).compute(raw),
            ma_fast: Sma::new(params.ma_fast).compute(raw),
            ma_slow: Sma::new(params.ma_slow).compute(raw),
            ret_short: PercentChange::new(params.ret_short).compute(raw),
            ret_long: PercentChange::new(params.ret_long).compute(raw),
            range_position: RangePosition::new(params.range_window).compute(raw),
            rsi: Rsi::new(params.rsi_period).compute(raw),
            hour: raw.iter().map(hour_encoding).collect(),
            dow: raw.iter().map(day_of_week_encoding).collect(),
            params,
        }
    }

    pub fn params(&self) -> &BankParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// ATR column, in the configured price space.
    pub fn atr(&self) -> &[f64] {
        &self.atr
    }

    pub fn ma_fast(&self) -> &[f64] {
        &self.ma_fast
    }

    pub fn ma_slow(&self) -> &[f64] {
        &self.ma_slow
    }

    /// All values at `index`. Panics if `index >= len()`.
    pub fn snapshot(&self, index: usize) -> IndicatorSnapshot {
        let (hour_sin, hour_cos) = self.hour[index];
        let (dow_sin, dow_cos) = self.dow[index];
        IndicatorSnapshot {
            close: self.close[index],
            atr: self.atr[index],
            atr_slow: self.atr_slow[index],
            volume_ratio: self.volume_ratio[index],
            adx: self.adx[index],
            ma_fast: self.ma_fast[index],
            ma_slow: self.ma_slow[index],
            ret_short: self.ret_short[index],
            ret_long: self.ret_long[index],
            range_position: self.range_position[index],
            rsi: self.rsi[index],
            hour_sin,
            hour_cos,
            dow_sin,
            dow_cos,
        }
    }
}
