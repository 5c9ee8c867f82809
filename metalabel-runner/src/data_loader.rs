//! OHLCV loading from CSV files.
//!
//! The timestamp column is `date` when present, otherwise the first column.
//! Accepted timestamp forms: RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD`
//! and integer Unix epochs (seconds, or milliseconds for values above
//! 1e11). Rows with an empty required field are dropped. Everything else
//! that does not parse is a fatal error: a run never starts on partial data.

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use metalabel_core::domain::{Candle, CandleSeries, SeriesError};

use crate::config::InstrumentSource;

const REQUIRED: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Epoch values above this are taken as milliseconds.
const MILLIS_CUTOFF: i64 = 100_000_000_000;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing column '{0}'")]
    MissingColumn(&'static str),
    #[error("row {row}: unparseable timestamp '{value}'")]
    BadTimestamp { row: usize, value: String },
    #[error("row {row}: column '{column}' is not a number: '{value}'")]
    BadNumber {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Column positions resolved from the header row.
struct Columns {
    date: usize,
    fields: [usize; 5],
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, LoadError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let date = find("date").unwrap_or(0);
        let mut fields = [0; 5];
        for (slot, name) in fields.iter_mut().zip(REQUIRED) {
            *slot = find(name).ok_or(LoadError::MissingColumn(name))?;
        }
        Ok(Self { date, fields })
    }
}

/// Parse one timestamp cell.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(epoch) = value.parse::<i64>() {
        return if epoch > MILLIS_CUTOFF {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Read a CSV stream into a validated series.
pub fn read_candles<R: Read>(reader: R, instrument: &str) -> Result<CandleSeries, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = Columns::resolve(rdr.headers()?)?;

    let mut candles = Vec::new();
    let mut dropped = 0usize;
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let row = i + 1;
        let cell = |idx: usize| record.get(idx).unwrap_or("");

        if std::iter::once(columns.date)
            .chain(columns.fields)
            .any(|idx| cell(idx).is_empty())
        {
            dropped += 1;
            continue;
        }

        let raw_ts = cell(columns.date);
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| LoadError::BadTimestamp {
            row,
            value: raw_ts.to_string(),
        })?;
        let mut values = [0.0; 5];
        for ((value, &idx), column) in values.iter_mut().zip(&columns.fields).zip(REQUIRED) {
            let raw = cell(idx);
            *value = raw.parse().map_err(|_| LoadError::BadNumber {
                row,
                column,
                value: raw.to_string(),
            })?;
        }
        let [open, high, low, close, volume] = values;
        candles.push(Candle::new(timestamp, open, high, low, close, volume));
    }

    if dropped > 0 {
        warn!(instrument, dropped, "dropped rows with empty fields");
    }
    Ok(CandleSeries::new(instrument, candles)?)
}

/// Load one instrument's CSV file.
pub fn load_csv(path: &Path, instrument: &str) -> Result<CandleSeries, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let series = read_candles(file, instrument)?;
    info!(instrument, candles = series.len(), path = %path.display(), "loaded series");
    Ok(series)
}

/// Load every configured instrument, in configuration order.
pub fn load_instruments(sources: &[InstrumentSource]) -> Result<Vec<CandleSeries>, LoadError> {
    sources.iter().map(|s| load_csv(&s.path, &s.name)).collect()
}

/// BLAKE3 fingerprint of a series' timestamps and OHLCV values.
pub fn dataset_hash(series: &CandleSeries) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(series.instrument().as_bytes());
    for c in series.candles() {
        hasher.update(&c.timestamp.timestamp().to_le_bytes());
        for v in [c.open, c.high, c.low, c.close, c.volume] {
            hasher.update(&v.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}
