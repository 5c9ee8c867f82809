//! Rolling-window statistics and the indicators built on them.
//!
//! All helpers follow trailing-window semantics: the value at index t covers
//! `values[t + 1 - window ..= t]` and is `NaN` until a full window exists or
//! whenever the window holds a `NaN`.

use super::Indicator;
use crate::domain::Candle;

/// Rolling arithmetic mean.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if window == 0 || n < window {
        return result;
    }
    let mut sum: f64 = values[..window].iter().sum();
    result[window - 1] = sum / window as f64;
    for i in window..n {
        sum += values[i] - values[i - window];
        result[i] = sum / window as f64;
    }
    // A NaN anywhere in the window poisons the running sum; recompute those.
    if values.iter().any(|v| v.is_nan()) {
        for i in (window - 1)..n {
            let slice = &values[i + 1 - window..=i];
            result[i] = if slice.iter().any(|v| v.is_nan()) {
                f64::NAN
            } else {
                slice.iter().sum::<f64>() / window as f64
            };
        }
    }
    result
}

/// Rolling median, kept incrementally on a sorted copy of the window.
pub fn rolling_median(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if window == 0 || n < window {
        return result;
    }
    let mut sorted: Vec<f64> = Vec::with_capacity(window);
    let mut nan_count = 0usize;
    for i in 0..n {
        let entering = values[i];
        if entering.is_nan() {
            nan_count += 1;
        } else {
            let pos = sorted.partition_point(|&v| v < entering);
            sorted.insert(pos, entering);
        }
        if i >= window {
            let leaving = values[i - window];
            if leaving.is_nan() {
                nan_count -= 1;
            } else {
                let pos = sorted.partition_point(|&v| v < leaving);
                sorted.remove(pos);
            }
        }
        if i + 1 >= window && nan_count == 0 {
            let mid = window / 2;
            result[i] = if window % 2 == 1 {
                sorted[mid]
            } else {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            };
        }
    }
    result
}

fn rolling_extreme(values: &[f64], window: usize, pick: fn(f64, f64) -> f64) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if window == 0 || n < window {
        return result;
    }
    for i in (window - 1)..n {
        let slice = &values[i + 1 - window..=i];
        if slice.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = slice.iter().copied().fold(slice[0], pick);
    }
    result
}

/// Rolling maximum.
pub fn rolling_max(values: &[f64], window: usize) -> Vec<f64> {
    rolling_extreme(values, window, f64::max)
}

/// Rolling minimum.
pub fn rolling_min(values: &[f64], window: usize) -> Vec<f64> {
    rolling_extreme(values, window, f64::min)
}

// ─── Indicators ─────────────────────────────────────────────────────

/// Volume relative to its rolling median.
///
/// `NaN` when the median is zero: a window of zero volume carries no
/// information about participation.
#[derive(Debug, Clone)]
pub struct VolumeRatio {
    window: usize,
    name: String,
}

impl VolumeRatio {
    pub fn new(window: usize) -> Self {
        assert!(window >= 1, "volume ratio window must be >= 1");
        Self {
            window,
            name: format!("volume_ratio_{window}"),
        }
    }
}

impl Indicator for VolumeRatio {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.window - 1
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let volume: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let median = rolling_median(&volume, self.window);
        volume
            .iter()
            .zip(&median)
            .map(|(&v, &m)| if m > 0.0 { v / m } else { f64::NAN })
            .collect()
    }
}

/// Position of the close inside its rolling high/low range, 0 = bottom,
/// 1 = top. `NaN` during warm-up and when the range is flat.
#[derive(Debug, Clone)]
pub struct RangePosition {
    window: usize,
    name: String,
}

impl RangePosition {
    pub fn new(window: usize) -> Self {
        assert!(window >= 1, "range window must be >= 1");
        Self {
            window,
            name: format!("range_position_{window}"),
        }
    }
}

impl Indicator for RangePosition {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.window - 1
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high = rolling_max(&close, self.window);
        let low = rolling_min(&close, self.window);
        (0..close.len())
            .map(|i| {
                let range = high[i] - low[i];
                if range > 0.0 {
                    (close[i] - low[i]) / range
                } else {
                    f64::NAN
                }
            })
            .collect()
    }
}
