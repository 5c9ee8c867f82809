//! Rolling indicators and the per-series indicator bank.
//!
//! Indicators are pure functions: candle history in, aligned numeric series
//! out. They are computed once over the full series before any detection
//! loop runs and then read by index. Warm-up values are `f64::NAN`.

pub mod adx;
pub mod atr;
pub mod bank;
pub mod cyclical;
pub mod roc;
pub mod rolling;
pub mod rsi;
pub mod sma;

pub use adx::Adx;
pub use atr::Atr;
pub use bank::{BankParams, IndicatorBank, IndicatorSnapshot, PriceSpace};
pub use cyclical::{day_of_week_encoding, hour_encoding};
pub use roc::PercentChange;
pub use rolling::{RangePosition, VolumeRatio};
pub use rsi::Rsi;
pub use sma::Sma;

use crate::domain::Candle;

/// A causal indicator over a candle series.
///
/// The output has the same length as the input and the first `lookback()`
/// values are `f64::NAN`.
///
/// # Look-ahead contamination guard
/// No value at index t may depend on candles after t. Every indicator must
/// produce identical prefixes for a truncated and a full series.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g. "sma_50", "atr_168").
    fn name(&self) -> &str;

    /// Number of candles needed before the output is defined.
    fn lookback(&self) -> usize;

    fn compute(&self, candles: &[Candle]) -> Vec<f64>;
}

/// Hourly candles built from close prices for tests.
///
/// open = previous close, high/low = max/min(open, close) ± 1.0,
/// volume = 1000.
#[cfg(test)]
pub fn make_candles(closes: &[f64]) -> Vec<Candle> {
    use chrono::{Duration, TimeZone, Utc};
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                timestamp: base + Duration::hours(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

/// Hourly candles from explicit (open, high, low, close) tuples.
#[cfg(test)]
pub fn make_ohlc_candles(data: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
    use chrono::{Duration, TimeZone, Utc};
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Candle {
            timestamp: base + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
