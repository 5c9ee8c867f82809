//! Probabilistic binary classifiers for meta-labeling.
//!
//! A `Learner` turns a `TrainingSet` into a fitted `Classifier`; the fitted
//! model only answers one question: the probability that a candidate's
//! return will be positive. Models are immutable once fitted and are
//! replaced wholesale at every retrain.

pub mod gbt;

pub use gbt::{GbtParams, GradientBoostedTrees};

use std::fmt::Debug;

use thiserror::Error;

use crate::domain::TradeCandidate;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClassifierError {
    #[error("cannot fit a classifier on an empty training set")]
    EmptyTrainingSet,
    #[error("feature row {row} has {got} columns, expected {expected}")]
    RaggedFeatures { row: usize, expected: usize, got: usize },
    #[error("{features} feature rows but {labels} labels")]
    LabelCountMismatch { features: usize, labels: usize },
    #[error("invalid classifier parameter: {0}")]
    InvalidParams(String),
}

/// Feature rows and binary labels, aligned by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    rows: Vec<Vec<f64>>,
    labels: Vec<u8>,
}

impl TrainingSet {
    pub fn new(rows: Vec<Vec<f64>>, labels: Vec<u8>) -> Result<Self, ClassifierError> {
        if rows.len() != labels.len() {
            return Err(ClassifierError::LabelCountMismatch {
                features: rows.len(),
                labels: labels.len(),
            });
        }
        if let Some(first) = rows.first() {
            let expected = first.len();
            if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
                return Err(ClassifierError::RaggedFeatures {
                    row,
                    expected,
                    got: r.len(),
                });
            }
        }
        Ok(Self { rows, labels })
    }

    /// Append the closed candidates; open ones carry no label and are skipped.
    pub fn extend_from_candidates<'a>(&mut self, candidates: impl IntoIterator<Item = &'a TradeCandidate>) {
        for c in candidates {
            if let Some(label) = c.label() {
                self.rows.push(c.features.clone());
                self.labels.push(label);
            }
        }
    }

    pub fn from_candidates<'a>(candidates: impl IntoIterator<Item = &'a TradeCandidate>) -> Self {
        let mut set = Self::default();
        set.extend_from_candidates(candidates);
        set
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Fraction of positive labels; 0.0 on an empty set.
    pub fn positive_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|&&l| l == 1).count() as f64 / self.labels.len() as f64
    }
}

/// A fitted model.
pub trait Classifier: Send + Sync + Debug {
    /// Probability in `[0, 1]` that the candidate's return is positive.
    fn predict_probability(&self, features: &[f64]) -> f64;
}

/// Fits classifiers. Fitting is deterministic for a fixed `seed`.
pub trait Learner: Send + Sync {
    fn name(&self) -> &str;

    fn fit(&self, data: &TrainingSet, seed: u64) -> Result<Box<dyn Classifier>, ClassifierError>;
}
