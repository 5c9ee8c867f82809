//! Candle, the fundamental market data unit.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// OHLCV candle for a single instrument at a single timestamp.
///
/// Immutable once loaded; every derived series (log prices, indicators,
/// features) is computed from these fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Reasons a single candle is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleError {
    #[error("candle at {timestamp} has a non-finite field")]
    NonFinite { timestamp: DateTime<Utc> },
    #[error("candle at {timestamp} has a non-positive price")]
    NonPositivePrice { timestamp: DateTime<Utc> },
    #[error("candle at {timestamp} has inconsistent OHLC (high={high}, low={low})")]
    InconsistentRange {
        timestamp: DateTime<Utc>,
        high: f64,
        low: f64,
    },
    #[error("candle at {timestamp} has negative volume {volume}")]
    NegativeVolume { timestamp: DateTime<Utc>, volume: f64 },
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// OHLCV sanity check: finite, positive prices, high >= low and the
    /// open/close inside the range.
    pub fn validate(&self) -> Result<(), CandleError> {
        let timestamp = self.timestamp;
        let fields = [self.open, self.high, self.low, self.close, self.volume];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(CandleError::NonFinite { timestamp });
        }
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleError::NonPositivePrice { timestamp });
        }
        let consistent = self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close;
        if !consistent {
            return Err(CandleError::InconsistentRange {
                timestamp,
                high: self.high,
                low: self.low,
            });
        }
        if self.volume < 0.0 {
            return Err(CandleError::NegativeVolume {
                timestamp,
                volume: self.volume,
            });
        }
        Ok(())
    }

    pub fn is_sane(&self) -> bool {
        self.validate().is_ok()
    }

    /// Hour of day in UTC, 0..=23.
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }

    /// Day of week with Monday = 0 .. Sunday = 6.
    pub fn day_of_week(&self) -> u32 {
        self.timestamp.weekday().num_days_from_monday()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_candle() -> Candle {
        Candle::new(
            Utc.with_ymd_and_hms(2024, 1, 3, 14, 0, 0).unwrap(),
            100.0,
            105.0,
            98.0,
            103.0,
            50_000.0,
        )
    }

    #[test]
    fn candle_is_sane() {
        assert!(sample_candle().is_sane());
    }

    #[test]
    fn candle_detects_non_finite() {
        let mut candle = sample_candle();
        candle.open = f64::NAN;
        assert!(matches!(
            candle.validate(),
            Err(CandleError::NonFinite { .. })
        ));
    }

    #[test]
    fn candle_detects_inverted_range() {
        let mut candle = sample_candle();
        candle.high = 97.0;
        assert!(matches!(
            candle.validate(),
            Err(CandleError::InconsistentRange { .. })
        ));
    }

    #[test]
    fn candle_detects_zero_price() {
        let mut candle = sample_candle();
        candle.low = 0.0;
        assert!(matches!(
            candle.validate(),
            Err(CandleError::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn calendar_fields() {
        // 2024-01-03 is a Wednesday.
        let candle = sample_candle();
        assert_eq!(candle.hour(), 14);
        assert_eq!(candle.day_of_week(), 2);
    }
}
