//! CandleSeries: one validated, index-addressed OHLCV sequence per instrument.

use super::candle::{Candle, CandleError};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Fatal input errors: a run never starts on a series that fails these checks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("instrument '{instrument}': candle series is empty")]
    Empty { instrument: String },
    #[error("instrument '{instrument}': timestamps not strictly increasing at index {index}")]
    NonMonotonic { instrument: String, index: usize },
    #[error("instrument '{instrument}': invalid candle at index {index}: {source}")]
    InvalidCandle {
        instrument: String,
        index: usize,
        #[source]
        source: CandleError,
    },
}

/// Ordered, gap-free candle sequence addressed by integer index.
///
/// Log closes are computed once on construction; every consumer reads the
/// same array so price and indicator indices cannot drift apart.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    instrument: String,
    candles: Vec<Candle>,
    log_close: Vec<f64>,
}

impl CandleSeries {
    pub fn new(instrument: impl Into<String>, candles: Vec<Candle>) -> Result<Self, SeriesError> {
        let instrument = instrument.into();
        if candles.is_empty() {
            return Err(SeriesError::Empty { instrument });
        }
        for (index, candle) in candles.iter().enumerate() {
            candle
                .validate()
                .map_err(|source| SeriesError::InvalidCandle {
                    instrument: instrument.clone(),
                    index,
                    source,
                })?;
            if index > 0 && candle.timestamp <= candles[index - 1].timestamp {
                return Err(SeriesError::NonMonotonic { instrument, index });
            }
        }
        let log_close = candles.iter().map(|c| c.close.ln()).collect();
        Ok(Self {
            instrument,
            candles,
            log_close,
        })
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    /// Always false for a constructed series; kept for the `len` convention.
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn candle(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        self.candles.get(index).map(|c| c.timestamp)
    }

    /// Natural log of each close.
    pub fn log_closes(&self) -> &[f64] {
        &self.log_close
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    /// Candles with every price replaced by its natural log.
    ///
    /// Volatility measured on this view is a log-return scale, directly
    /// comparable with log-price distances.
    pub fn log_candles(&self) -> Vec<Candle> {
        self.candles
            .iter()
            .map(|c| Candle {
                timestamp: c.timestamp,
                open: c.open.ln(),
                high: c.high.ln(),
                low: c.low.ln(),
                close: c.close.ln(),
                volume: c.volume,
            })
            .collect()
    }

    /// Log return from bar `i` to bar `i + 1`, `None` on the last bar.
    pub fn next_log_return(&self, index: usize) -> Option<f64> {
        let next = self.log_close.get(index + 1)?;
        Some(next - self.log_close[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candles(closes: &[f64]) -> Vec<Candle> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(base + Duration::hours(i as i64), c, c + 1.0, c - 1.0, c, 10.0))
            .collect()
    }

    #[test]
    fn builds_log_closes() {
        let series = CandleSeries::new("BTC", candles(&[100.0, 110.0])).unwrap();
        assert_eq!(series.len(), 2);
        assert!((series.log_closes()[1] - 110.0_f64.ln()).abs() < 1e-12);
        let r = series.next_log_return(0).unwrap();
        assert!((r - (110.0_f64 / 100.0).ln()).abs() < 1e-12);
        assert_eq!(series.next_log_return(1), None);
    }

    #[test]
    fn rejects_empty() {
        let err = CandleSeries::new("BTC", Vec::new()).unwrap_err();
        assert!(matches!(err, SeriesError::Empty { .. }));
    }

    #[test]
    fn rejects_duplicate_timestamps() {
        let mut c = candles(&[100.0, 101.0, 102.0]);
        c[2].timestamp = c[1].timestamp;
        let err = CandleSeries::new("BTC", c).unwrap_err();
        assert_eq!(
            err,
            SeriesError::NonMonotonic {
                instrument: "BTC".into(),
                index: 2
            }
        );
    }

    #[test]
    fn rejects_invalid_candle() {
        let mut c = candles(&[100.0, 101.0]);
        c[1].close = -1.0;
        let err = CandleSeries::new("ETH", c).unwrap_err();
        assert!(matches!(err, SeriesError::InvalidCandle { index: 1, .. }));
    }
}
