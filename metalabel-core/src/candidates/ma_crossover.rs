//! Moving-average crossover detector.
//!
//! Opens a long trade on a bullish cross of the fast SMA over the slow SMA.
//! ATR is measured on raw prices and converted to log units as `atr / close`,
//! so the trade bounds live in the same space as the trendline variant.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::lifecycle::{EntryPlan, Ledger};
use super::{check_multiple, CandidateGenerator, GenerateError};
use crate::domain::{CandidateSet, CandleSeries};
use crate::indicators::{BankParams, IndicatorBank};

pub const FEATURE_NAMES: [&str; 5] = ["rsi", "adx", "volume_ratio", "price_to_slow", "ma_spread"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaCrossoverParams {
    pub fast: usize,
    pub slow: usize,
    pub hold_period: usize,
    pub tp_multiple: f64,
    pub sl_multiple: f64,
    pub atr_period: usize,
}

impl Default for MaCrossoverParams {
    fn default() -> Self {
        Self {
            fast: 50,
            slow: 200,
            hold_period: 24,
            tp_multiple: 3.0,
            sl_multiple: 2.0,
            atr_period: 14,
        }
    }
}

impl MaCrossoverParams {
    pub fn validate(&self) -> Result<(), GenerateError> {
        if self.fast == 0 || self.fast >= self.slow {
            return Err(GenerateError::InvalidMaPeriods {
                fast: self.fast,
                slow: self.slow,
            });
        }
        if self.atr_period == 0 {
            return Err(GenerateError::ZeroPeriod { name: "atr_period" });
        }
        if self.hold_period == 0 {
            return Err(GenerateError::ZeroHoldPeriod);
        }
        check_multiple("tp_multiple", self.tp_multiple)?;
        check_multiple("sl_multiple", self.sl_multiple)
    }
}

#[derive(Debug, Clone)]
pub struct MaCrossover {
    params: MaCrossoverParams,
    name: String,
}

impl MaCrossover {
    pub fn new(params: MaCrossoverParams) -> Result<Self, GenerateError> {
        params.validate()?;
        let name = format!("ma_crossover_{}_{}", params.fast, params.slow);
        Ok(Self { params, name })
    }

    pub fn params(&self) -> &MaCrossoverParams {
        &self.params
    }
}

impl CandidateGenerator for MaCrossover {
    fn name(&self) -> &str {
        &self.name
    }

    fn warmup(&self) -> usize {
        self.params.slow.max(self.params.atr_period)
    }

    fn feature_names(&self) -> Vec<String> {
        FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn generate(&self, series: &CandleSeries) -> Result<CandidateSet, GenerateError> {
        let p = &self.params;
        let bank = IndicatorBank::build(series, BankParams::ma_crossover(p.fast, p.slow, p.atr_period));
        let (fast, slow) = (bank.ma_fast(), bank.ma_slow());
        let log_close = series.log_closes();
        let candles = series.candles();
        let mut ledger = Ledger::new(CandidateSet::new(series.instrument(), self.feature_names()));

        for i in self.warmup()..series.len() {
            let time = candles[i].timestamp;
            let bull_cross = fast[i - 1] <= slow[i - 1] && fast[i] > slow[i];
            if ledger.is_flat() && bull_cross {
                let snap = bank.snapshot(i);
                let atr = snap.atr / snap.close;
                if atr.is_finite() && atr > 0.0 {
                    let features = vec![
                        snap.rsi,
                        snap.adx,
                        snap.volume_ratio,
                        (snap.close - snap.ma_slow) / snap.ma_slow,
                        (snap.ma_fast - snap.ma_slow) / snap.ma_slow,
                    ];
                    ledger.open(EntryPlan {
                        index: i,
                        time,
                        log_price: log_close[i],
                        atr,
                        tp_multiple: p.tp_multiple,
                        sl_multiple: p.sl_multiple,
                        hold_period: p.hold_period,
                        trendline: None,
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
            "ma crossover scan complete"
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Candle;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[f64]) -> CandleSeries {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(base + Duration::hours(i as i64), c, c * 1.005, c * 0.995, c, 50.0))
            .collect();
        CandleSeries::new("TEST", candles).unwrap()
    }

    fn params() -> MaCrossoverParams {
        MaCrossoverParams {
            fast: 3,
            slow: 8,
            hold_period: 4,
            tp_multiple: 3.0,
            sl_multiple: 2.0,
            atr_period: 5,
        }
    }

    #[test]
    fn enters_on_bullish_cross() {
        // Decline then a sharp rally: the fast average crosses the slow one.
        let mut closes: Vec<f64> = (0..20).map(|i| 120.0 - i as f64).collect();
        closes.extend((0..15).map(|i| 101.0 + 3.0 * i as f64));
        let s = series(&closes);
        let set = MaCrossover::new(params()).unwrap().generate(&s).unwrap();

        assert!(!set.is_empty());
        let first = &set.candidates[0];
        assert!(first.entry_index >= 20);
        assert!(first.trendline.is_none());
        assert_eq!(first.features.len(), 5);
        // Fast above slow at entry.
        assert!(first.features[4] > 0.0);
    }

    #[test]
    fn no_cross_no_trade() {
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();
        let set = MaCrossover::new(params()).unwrap().generate(&series(&closes)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn rejects_inverted_periods() {
        let p = MaCrossoverParams {
            fast: 10,
            slow: 5,
            ..MaCrossoverParams::default()
        };
        assert!(matches!(
            MaCrossover::new(p),
            Err(GenerateError::InvalidMaPeriods { fast: 10, slow: 5 })
        ));
    }
}
