//! Metalabel Core: domain types, indicators, candidate generators, classifiers.
//!
//! This crate holds everything that is a pure function of a candle series:
//! - Domain types (candles, validated series, trade candidates, ledgers)
//! - The indicator bank, addressed by index through one snapshot accessor
//! - Trendline fitting
//! - Candidate generators (trendline breakout, moving-average crossover)
//! - The classifier capability and a seeded gradient-boosted tree learner
//! - The deterministic seed hierarchy

pub mod candidates;
pub mod classifier;
pub mod domain;
pub mod indicators;
pub mod rng;
pub mod trendline;

pub use candidates::{CandidateGenerator, GenerateError, StrategyConfig};
pub use classifier::{Classifier, ClassifierError, Learner, TrainingSet};
pub use domain::{CandidateSet, Candle, CandleSeries, ExitReason, TradeCandidate};
