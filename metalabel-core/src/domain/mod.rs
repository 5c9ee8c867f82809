//! Domain types: candles, validated series and the trade ledger.

pub mod candle;
pub mod series;
pub mod trade;

pub use candle::{Candle, CandleError};
pub use series::{CandleSeries, SeriesError};
pub use trade::{CandidateSet, ExitReason, TradeCandidate, TradeExit, Trendline};
