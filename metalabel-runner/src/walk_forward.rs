//! Walk-forward meta-labeling over one instrument.
//!
//! Time advances one candle at a time. Within an index the order is fixed:
//!
//! 1. retrain at a checkpoint (`train_size`, then every `step_size`) on the
//!    closed trades of the trailing window, skipped when too few qualify;
//! 2. exit checks for the `filtered` and `baseline` streams;
//! 3. the candidate entering at this index, if any, is scored and offered
//!    to both streams.
//!
//! The baseline stream ignores the score but still waits for a first model,
//! so both streams start trading at the same index.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use metalabel_core::classifier::{Classifier, ClassifierError, Learner, TrainingSet};
use metalabel_core::domain::{CandidateSet, CandleSeries, TradeCandidate};
use metalabel_core::rng::SeedHierarchy;

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardParams {
    /// Trailing window (in candles) a model is trained on. Also the first
    /// checkpoint.
    pub train_size: usize,
    /// Candles between checkpoints.
    pub step_size: usize,
    /// A checkpoint with fewer closed trades keeps the previous model.
    pub min_train_trades: usize,
    pub default_threshold: f64,
}

impl Default for WalkForwardParams {
    fn default() -> Self {
        Self {
            train_size: 365 * 24 * 2,
            step_size: 365 * 24,
            min_train_trades: 10,
            default_threshold: 0.5,
        }
    }
}

impl WalkForwardParams {
    pub fn validate(&self) -> Result<(), WalkForwardError> {
        if self.train_size == 0 {
            return Err(WalkForwardError::ZeroWindow { name: "train_size" });
        }
        if self.step_size == 0 {
            return Err(WalkForwardError::ZeroWindow { name: "step_size" });
        }
        check_threshold(self.default_threshold)
    }

    /// Retrain indices below `len`.
    pub fn checkpoints(&self, len: usize) -> impl Iterator<Item = usize> {
        (self.train_size..len).step_by(self.step_size.max(1))
    }
}

pub(crate) fn check_threshold(value: f64) -> Result<(), WalkForwardError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(WalkForwardError::ThresholdOutOfRange { value })
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("{name} must be >= 1")]
    ZeroWindow { name: &'static str },
    #[error("threshold must be in [0, 1], got {value}")]
    ThresholdOutOfRange { value: f64 },
    #[error("ledger belongs to '{ledger}' but the series is '{series}'")]
    InstrumentMismatch { ledger: String, series: String },
    #[error("no instruments to evaluate")]
    NoInstruments,
    #[error("classifier fit failed at checkpoint {index}: {source}")]
    Fit {
        index: usize,
        #[source]
        source: ClassifierError,
    },
}

// ─── Results ─────────────────────────────────────────────────────────

/// What happened at one retrain checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointReport {
    pub index: usize,
    pub train_trades: usize,
    pub trained: bool,
}

/// Per-index positions of one signal stream and the candidates it took.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamTrace {
    /// 1 while in a trade (entry bar included), 0 when flat or on the exit bar.
    pub positions: Vec<u8>,
    /// Ledger ids of the entered candidates, in entry order.
    pub entered: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct WalkForwardResult {
    pub instrument: String,
    /// The ledger with model probabilities attached.
    pub ledger: CandidateSet,
    pub filtered: StreamTrace,
    pub baseline: StreamTrace,
    pub checkpoints: Vec<CheckpointReport>,
    /// Model in force at the end of the series.
    pub last_model: Option<Arc<dyn Classifier>>,
}

// ─── Evaluation state ────────────────────────────────────────────────

#[derive(Debug)]
struct Stream {
    /// Ledger position of the open trade.
    open: Option<usize>,
    trace: StreamTrace,
}

impl Stream {
    fn new(len: usize) -> Self {
        Self {
            open: None,
            trace: StreamTrace {
                positions: vec![0; len],
                entered: Vec::new(),
            },
        }
    }

    fn is_flat(&self) -> bool {
        self.open.is_none()
    }

    fn check_exit(&mut self, ledger: &[TradeCandidate], index: usize, log_close: f64) {
        let Some(k) = self.open else {
            return;
        };
        if ledger[k].exit_trigger(index, log_close).is_some() {
            self.open = None;
        } else {
            self.trace.positions[index] = 1;
        }
    }

    fn enter(&mut self, k: usize, id: usize, index: usize) {
        self.open = Some(k);
        self.trace.positions[index] = 1;
        self.trace.entered.push(id);
    }
}

/// The per-instrument time loop, advanced segment by segment so the pooled
/// orchestrator can train between segments.
#[derive(Debug)]
pub(crate) struct Evaluator<'a> {
    series: &'a CandleSeries,
    ledger: CandidateSet,
    threshold: f64,
    cursor: usize,
    next_candidate: usize,
    filtered: Stream,
    baseline: Stream,
    last_model: Option<Arc<dyn Classifier>>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(
        series: &'a CandleSeries,
        mut ledger: CandidateSet,
        threshold: f64,
    ) -> Result<Self, WalkForwardError> {
        if ledger.instrument != series.instrument() {
            return Err(WalkForwardError::InstrumentMismatch {
                ledger: ledger.instrument,
                series: series.instrument().to_string(),
            });
        }
        check_threshold(threshold)?;
        for c in &mut ledger.candidates {
            c.model_probability = None;
        }
        let len = series.len();
        Ok(Self {
            series,
            ledger,
            threshold,
            cursor: 0,
            next_candidate: 0,
            filtered: Stream::new(len),
            baseline: Stream::new(len),
            last_model: None,
        })
    }

    pub(crate) fn ledger(&self) -> &CandidateSet {
        &self.ledger
    }

    pub(crate) fn len(&self) -> usize {
        self.series.len()
    }

    /// Run exit and entry steps for every index in `[cursor, end)` with
    /// `model` in force.
    pub(crate) fn advance(&mut self, end: usize, model: Option<&Arc<dyn Classifier>>) {
        let end = end.min(self.series.len());
        if self.cursor >= end {
            return;
        }
        self.last_model = model.cloned();
        let log_close = self.series.log_closes();

        while self.cursor < end {
            let i = self.cursor;
            self.filtered.check_exit(&self.ledger.candidates, i, log_close[i]);
            self.baseline.check_exit(&self.ledger.candidates, i, log_close[i]);

            let k = self.next_candidate;
            if k < self.ledger.candidates.len() && self.ledger.candidates[k].entry_index == i {
                self.next_candidate += 1;
                if let Some(model) = model {
                    let id = self.ledger.candidates[k].id;
                    if self.baseline.is_flat() {
                        self.baseline.enter(k, id, i);
                    }
                    let p = model.predict_probability(&self.ledger.candidates[k].features);
                    self.ledger.candidates[k].model_probability = Some(p);
                    if self.filtered.is_flat() && p >= self.threshold {
                        self.filtered.enter(k, id, i);
                    }
                }
            }
            self.cursor += 1;
        }
    }

    pub(crate) fn finish(self, checkpoints: Vec<CheckpointReport>) -> WalkForwardResult {
        WalkForwardResult {
            instrument: self.ledger.instrument.clone(),
            ledger: self.ledger,
            filtered: self.filtered.trace,
            baseline: self.baseline.trace,
            checkpoints,
            last_model: self.last_model,
        }
    }
}

// ─── Retraining ──────────────────────────────────────────────────────

/// Fit a model on the trailing-window closed trades of every ledger.
///
/// Returns the report and, when enough trades qualified, the new model.
pub(crate) fn retrain(
    ledgers: &[&CandidateSet],
    index: usize,
    params: &WalkForwardParams,
    learner: &dyn Learner,
    seeds: &SeedHierarchy,
    scope: &str,
) -> Result<(CheckpointReport, Option<Arc<dyn Classifier>>), WalkForwardError> {
    let mut data = TrainingSet::default();
    for ledger in ledgers {
        data.extend_from_candidates(ledger.training_window(index, params.train_size));
    }
    let train_trades = data.len();

    if train_trades == 0 || train_trades < params.min_train_trades {
        debug!(index, train_trades, min = params.min_train_trades, "skipping retrain, too few closed trades");
        let report = CheckpointReport {
            index,
            train_trades,
            trained: false,
        };
        return Ok((report, None));
    }

    let seed = seeds.sub_seed(scope, index as u64);
    let model = learner
        .fit(&data, seed)
        .map_err(|source| WalkForwardError::Fit { index, source })?;
    info!(
        index,
        train_trades,
        instruments = ledgers.len(),
        positive_rate = data.positive_rate(),
        "retrained classifier"
    );
    let report = CheckpointReport {
        index,
        train_trades,
        trained: true,
    };
    Ok((report, Some(Arc::from(model))))
}

// ─── Entry points ────────────────────────────────────────────────────

/// Walk-forward over a single instrument, training only on its own trades.
pub fn run_walk_forward(
    series: &CandleSeries,
    ledger: CandidateSet,
    learner: &dyn Learner,
    params: &WalkForwardParams,
    threshold: f64,
    seeds: &SeedHierarchy,
) -> Result<WalkForwardResult, WalkForwardError> {
    params.validate()?;
    let mut evaluator = Evaluator::new(series, ledger, threshold)?;
    let mut model: Option<Arc<dyn Classifier>> = None;
    let mut reports = Vec::new();

    evaluator.advance(params.train_size, None);
    for index in params.checkpoints(series.len()) {
        let (report, fitted) = retrain(
            &[evaluator.ledger()],
            index,
            params,
            learner,
            seeds,
            series.instrument(),
        )?;
        if fitted.is_some() {
            model = fitted;
        }
        reports.push(report);
        evaluator.advance(index + params.step_size, model.as_ref());
    }

    Ok(evaluator.finish(reports))
}

/// Score every closed candidate of `set` with an already-trained model,
/// outside any walk-forward schedule.
///
/// Used to apply the final pooled model to an instrument it never saw.
pub fn score_with_model(set: &CandidateSet, model: &dyn Classifier) -> CandidateSet {
    let mut scored = set.clone();
    scored.candidates.retain(|c| c.is_closed());
    for c in &mut scored.candidates {
        c.model_probability = Some(model.predict_probability(&c.features));
    }
    scored
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use metalabel_core::domain::{Candle, ExitReason, TradeExit};

    /// Classifier returning a fixed probability.
    #[derive(Debug)]
    pub(crate) struct Constant(pub f64);

    impl Classifier for Constant {
        fn predict_probability(&self, _features: &[f64]) -> f64 {
            self.0
        }
    }

    /// Learner that records nothing and returns `Constant(p)`.
    pub(crate) struct ConstantLearner(pub f64);

    impl Learner for ConstantLearner {
        fn name(&self) -> &str {
            "constant"
        }

        fn fit(&self, data: &TrainingSet, _seed: u64) -> Result<Box<dyn Classifier>, ClassifierError> {
            if data.is_empty() {
                return Err(ClassifierError::EmptyTrainingSet);
            }
            Ok(Box::new(Constant(self.0)))
        }
    }

    pub(crate) fn flat_series(instrument: &str, len: usize) -> CandleSeries {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = (0..len)
            .map(|i| Candle::new(base + Duration::hours(i as i64), 100.0, 100.0, 100.0, 100.0, 1.0))
            .collect();
        CandleSeries::new(instrument, candles).unwrap()
    }

    /// Candidates on a flat series: each exits at its hold deadline.
    pub(crate) fn ledger(instrument: &str, entries: &[(usize, usize)]) -> CandidateSet {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let log_price = 100.0f64.ln();
        let mut set = CandidateSet::new(instrument, vec!["f".into()]);
        for (id, &(entry, exit)) in entries.iter().enumerate() {
            set.candidates.push(TradeCandidate {
                id,
                entry_index: entry,
                entry_time: t0 + Duration::hours(entry as i64),
                entry_log_price: log_price,
                atr_at_entry: 0.01,
                take_profit_level: log_price + 0.03,
                stop_loss_level: log_price - 0.03,
                hold_deadline_index: exit,
                trendline: None,
                features: vec![id as f64],
                exit: Some(TradeExit {
                    index: exit,
                    time: t0 + Duration::hours(exit as i64),
                    log_price,
                    reason: ExitReason::HoldDeadline,
                }),
                model_probability: None,
            });
        }
        set
    }

    fn params(train_size: usize, step_size: usize, min_train_trades: usize) -> WalkForwardParams {
        WalkForwardParams {
            train_size,
            step_size,
            min_train_trades,
            default_threshold: 0.5,
        }
    }

    #[test]
    fn checkpoint_schedule() {
        let p = params(10, 5, 1);
        assert_eq!(p.checkpoints(26).collect::<Vec<_>>(), vec![10, 15, 20, 25]);
        assert_eq!(p.checkpoints(10).count(), 0);
    }

    #[test]
    fn no_model_no_entries_no_scores() {
        let series = flat_series("X", 40);
        let set = ledger("X", &[(2, 4), (5, 8)]);
        let result = run_walk_forward(&series, set, &ConstantLearner(0.9), &params(20, 10, 1), 0.5, &SeedHierarchy::new(1)).unwrap();
        assert!(result.filtered.entered.is_empty());
        assert!(result.baseline.entered.is_empty());
        assert!(result.ledger.scored().next().is_none());
        // Two trades closed before index 20 and entered after index 0.
        assert_eq!(result.checkpoints[0], CheckpointReport { index: 20, train_trades: 2, trained: true });
    }

    #[test]
    fn baseline_gated_on_model_existence_only() {
        let series = flat_series("X", 40);
        let set = ledger("X", &[(2, 4), (5, 8), (22, 25), (30, 33)]);
        // Low probability: filtered never enters, baseline does.
        let result = run_walk_forward(&series, set, &ConstantLearner(0.1), &params(20, 100, 1), 0.5, &SeedHierarchy::new(1)).unwrap();
        assert_eq!(result.baseline.entered, vec![2, 3]);
        assert!(result.filtered.entered.is_empty());
        let probs: Vec<Option<f64>> = result.ledger.iter().map(|c| c.model_probability).collect();
        assert_eq!(probs, vec![None, None, Some(0.1), Some(0.1)]);
        assert!(result.last_model.is_some());
    }

    #[test]
    fn positions_cover_entry_to_before_exit() {
        let series = flat_series("X", 40);
        let set = ledger("X", &[(2, 4), (5, 8), (22, 25)]);
        let result = run_walk_forward(&series, set, &ConstantLearner(0.9), &params(20, 100, 1), 0.5, &SeedHierarchy::new(1)).unwrap();
        assert_eq!(result.filtered.entered, vec![2]);
        let pos = &result.filtered.positions;
        assert_eq!(&pos[21..27], &[0, 1, 1, 1, 0, 0]);
        assert_eq!(result.filtered, result.baseline);
    }

    #[test]
    fn too_few_trades_skips_retrain() {
        let series = flat_series("X", 40);
        let set = ledger("X", &[(2, 4), (22, 25)]);
        let result = run_walk_forward(&series, set, &ConstantLearner(0.9), &params(20, 100, 5), 0.5, &SeedHierarchy::new(1)).unwrap();
        assert_eq!(result.checkpoints, vec![CheckpointReport { index: 20, train_trades: 1, trained: false }]);
        assert!(result.last_model.is_none());
        assert!(result.baseline.entered.is_empty());
    }

    #[test]
    fn exit_at_checkpoint_excluded_from_training() {
        let series = flat_series("X", 40);
        // Second trade exits exactly at the checkpoint.
        let set = ledger("X", &[(2, 4), (15, 20)]);
        let result = run_walk_forward(&series, set, &ConstantLearner(0.9), &params(20, 100, 1), 0.5, &SeedHierarchy::new(1)).unwrap();
        assert_eq!(result.checkpoints[0].train_trades, 1);
    }

    #[test]
    fn mismatched_ledger_rejected() {
        let series = flat_series("X", 10);
        let set = CandidateSet::new("Y", vec![]);
        let err = run_walk_forward(&series, set, &ConstantLearner(0.9), &params(5, 5, 1), 0.5, &SeedHierarchy::new(1)).unwrap_err();
        assert!(matches!(err, WalkForwardError::InstrumentMismatch { .. }));
    }

    #[test]
    fn invalid_params_rejected() {
        let series = flat_series("X", 10);
        let err = run_walk_forward(&series, ledger("X", &[]), &ConstantLearner(0.9), &params(0, 5, 1), 0.5, &SeedHierarchy::new(1)).unwrap_err();
        assert!(matches!(err, WalkForwardError::ZeroWindow { name: "train_size" }));
        let err = run_walk_forward(&series, ledger("X", &[]), &ConstantLearner(0.9), &params(5, 5, 1), 1.5, &SeedHierarchy::new(1)).unwrap_err();
        assert!(matches!(err, WalkForwardError::ThresholdOutOfRange { .. }));
    }

    #[test]
    fn score_with_model_skips_open_trades() {
        let mut set = ledger("X", &[(2, 4), (5, 8)]);
        set.candidates[1].exit = None;
        let scored = score_with_model(&set, &Constant(0.7));
        assert_eq!(scored.len(), 1);
        assert_eq!(scored.candidates[0].model_probability, Some(0.7));
    }
}
