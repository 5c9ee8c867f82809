//! Fractional price change over N candles.
//!
//! pct[t] = (close[t] - close[t-period]) / close[t-period]. Lookback: period.

use super::Indicator;
use crate::domain::Candle;

#[derive(Debug, Clone)]
pub struct PercentChange {
    period: usize,
    name: String,
}

impl PercentChange {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "percent change period must be >= 1");
        Self {
            period,
            name: format!("ret_{period}"),
        }
    }
}

impl Indicator for PercentChange {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        let mut result = vec![f64::NAN; candles.len()];
        for i in self.period..candles.len() {
            let prev = candles[i - self.period].close;
            if prev != 0.0 {
                result[i] = (candles[i].close - prev) / prev;
            }
        }
        result
    }
}
