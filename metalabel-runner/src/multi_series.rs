//! Pooled walk-forward across several instruments.
//!
//! Each checkpoint is a barrier: the closed trades of every instrument's
//! trailing window are pooled into one training set and a single model is
//! fitted. Every instrument's evaluator then advances to the next checkpoint
//! independently, in parallel, using that model.
//!
//! Trailing windows are aligned by each instrument's own candle index, not
//! by wall-clock time. Series that start on different dates are therefore
//! only approximately synchronised.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use metalabel_core::classifier::{Classifier, Learner};
use metalabel_core::domain::{CandidateSet, CandleSeries};
use metalabel_core::rng::SeedHierarchy;

use crate::walk_forward::{
    retrain, CheckpointReport, Evaluator, WalkForwardError, WalkForwardParams, WalkForwardResult,
};

/// Seed scope shared by every pooled checkpoint.
pub const POOLED_SCOPE: &str = "pooled";

/// One instrument's input to the pooled run.
#[derive(Debug, Clone)]
pub struct InstrumentInput<'a> {
    pub series: &'a CandleSeries,
    pub ledger: CandidateSet,
    pub threshold: f64,
}

/// Pooled checkpoint, with the number of instruments still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PooledCheckpoint {
    #[serde(flatten)]
    pub report: CheckpointReport,
    pub instruments: usize,
}

#[derive(Debug, Clone)]
pub struct PooledResult {
    /// In input order.
    pub instruments: Vec<WalkForwardResult>,
    pub checkpoints: Vec<PooledCheckpoint>,
    pub last_model: Option<Arc<dyn Classifier>>,
}

/// Walk-forward with training pooled across all `inputs`.
pub fn run_pooled(
    inputs: Vec<InstrumentInput<'_>>,
    learner: &dyn Learner,
    params: &WalkForwardParams,
    seeds: &SeedHierarchy,
) -> Result<PooledResult, WalkForwardError> {
    params.validate()?;
    if inputs.is_empty() {
        return Err(WalkForwardError::NoInstruments);
    }

    let mut evaluators = inputs
        .into_iter()
        .map(|input| Evaluator::new(input.series, input.ledger, input.threshold))
        .collect::<Result<Vec<_>, _>>()?;
    let max_len = evaluators.iter().map(Evaluator::len).max().unwrap_or(0);

    let mut model: Option<Arc<dyn Classifier>> = None;
    let mut checkpoints = Vec::new();

    evaluators
        .par_iter_mut()
        .for_each(|e| e.advance(params.train_size, None));

    for index in params.checkpoints(max_len) {
        let ledgers: Vec<&CandidateSet> = evaluators.iter().map(Evaluator::ledger).collect();
        let (report, fitted) = retrain(&ledgers, index, params, learner, seeds, POOLED_SCOPE)?;
        if fitted.is_some() {
            model = fitted;
        }
        checkpoints.push(PooledCheckpoint {
            report,
            instruments: evaluators.iter().filter(|e| e.len() > index).count(),
        });

        let end = index + params.step_size;
        let current = model.as_ref();
        evaluators
            .par_iter_mut()
            .for_each(|e| e.advance(end, current));
    }

    let instruments = evaluators
        .into_iter()
        .map(|e| {
            let len = e.len();
            let reports = checkpoints
                .iter()
                .map(|c| c.report)
                .filter(|r| r.index < len)
                .collect();
            e.finish(reports)
        })
        .collect();

    Ok(PooledResult {
        instruments,
        checkpoints,
        last_model: model,
    })
}
