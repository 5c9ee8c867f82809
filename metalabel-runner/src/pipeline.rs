//! End-to-end run: load, generate, pooled walk-forward, fees, reports,
//! threshold sweep and account simulation.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use metalabel_core::candidates::{CandidateGenerator, GenerateError};
use metalabel_core::classifier::{Classifier, ClassifierError, GradientBoostedTrees};
use metalabel_core::domain::{CandidateSet, CandleSeries};
use metalabel_core::rng::SeedHierarchy;

use crate::account::{AccountError, AccountSimulation, AccountSimulator, AccountSummary};
use crate::config::{ConfigError, RunConfig, RunId};
use crate::data_loader::{dataset_hash, load_instruments, LoadError};
use crate::fees::{apply_fees, cost_for, NetTrade};
use crate::metrics::InstrumentReport;
use crate::multi_series::{run_pooled, InstrumentInput, PooledCheckpoint};
use crate::threshold::{sweep_candidates, ThresholdSweep};
use crate::walk_forward::{WalkForwardError, WalkForwardResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("candidate generation failed for '{instrument}': {source}")]
    Generate {
        instrument: String,
        #[source]
        source: GenerateError,
    },
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    WalkForward(#[from] WalkForwardError),
    #[error(transparent)]
    Account(#[from] AccountError),
}

/// Everything produced for one instrument.
#[derive(Debug, Clone)]
pub struct InstrumentOutcome {
    pub instrument: String,
    pub candles: usize,
    pub dataset_hash: String,
    pub walk_forward: WalkForwardResult,
    pub report: InstrumentReport,
    pub sweep: ThresholdSweep,
    pub trades: Vec<NetTrade>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_id: RunId,
    pub config: RunConfig,
    /// In configuration order.
    pub instruments: Vec<InstrumentOutcome>,
    pub checkpoints: Vec<PooledCheckpoint>,
    pub account: AccountSimulation,
    pub last_model: Option<Arc<dyn Classifier>>,
}

/// Version of the `summary.json` layout. Newer versions are rejected on load.
pub const SCHEMA_VERSION: u32 = 1;

/// Serializable digest of a run, written as `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub run_id: RunId,
    pub config: RunConfig,
    pub instruments: Vec<InstrumentSummary>,
    pub checkpoints: Vec<PooledCheckpoint>,
    pub account: AccountSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSummary {
    pub instrument: String,
    pub candles: usize,
    pub dataset_hash: String,
    pub candidates: usize,
    pub scored: usize,
    pub report: InstrumentReport,
    pub best_threshold: f64,
    pub best_profit_factor: f64,
}

impl PipelineOutput {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            schema_version: SCHEMA_VERSION,
            run_id: self.run_id.clone(),
            config: self.config.clone(),
            instruments: self
                .instruments
                .iter()
                .map(|o| InstrumentSummary {
                    instrument: o.instrument.clone(),
                    candles: o.candles,
                    dataset_hash: o.dataset_hash.clone(),
                    candidates: o.walk_forward.ledger.len(),
                    scored: o.walk_forward.ledger.scored().count(),
                    report: o.report.clone(),
                    best_threshold: o.sweep.best_threshold,
                    best_profit_factor: o.sweep.best_profit_factor,
                })
                .collect(),
            checkpoints: self.checkpoints.clone(),
            account: self.account.summary.clone(),
        }
    }
}

/// Validate `config`, load its instruments and run.
pub fn run_pipeline(config: &RunConfig) -> Result<PipelineOutput, PipelineError> {
    config.validate()?;
    let series = load_instruments(&config.instruments)?;
    run_on_series(config, series)
}

/// Generate the ledger of every series with the configured strategy.
pub fn generate_ledgers(
    config: &RunConfig,
    series: &[CandleSeries],
) -> Result<Vec<CandidateSet>, PipelineError> {
    let generator = config.strategy.build().map_err(ConfigError::from)?;
    series
        .par_iter()
        .map(|s| -> Result<CandidateSet, PipelineError> {
            let set = generator.generate(s).map_err(|source| PipelineError::Generate {
                instrument: s.instrument().to_string(),
                source,
            })?;
            info!(
                instrument = s.instrument(),
                generator = generator.name(),
                candles = s.len(),
                candidates = set.len(),
                closed = set.closed().count(),
                "generated candidates"
            );
            Ok(set)
        })
        .collect()
}

/// Run on already-loaded series. The instrument list of `config` is not
/// consulted; every series takes part.
pub fn run_on_series(
    config: &RunConfig,
    series: Vec<CandleSeries>,
) -> Result<PipelineOutput, PipelineError> {
    let run_id = config.run_id()?;
    let ledgers = generate_ledgers(config, &series)?;

    let learner = GradientBoostedTrees::new(config.classifier.clone())?;
    let seeds = SeedHierarchy::new(config.classifier.seed);
    let thresholds = config.threshold_table();

    let inputs = series
        .iter()
        .zip(ledgers)
        .map(|(s, ledger)| InstrumentInput {
            series: s,
            ledger,
            threshold: thresholds.for_instrument(s.instrument()),
        })
        .collect();
    let pooled = run_pooled(inputs, &learner, &config.walk_forward, &seeds)?;

    let mut instruments = Vec::with_capacity(series.len());
    for (s, result) in series.iter().zip(pooled.instruments) {
        let name = s.instrument();
        let threshold = thresholds.for_instrument(name);
        let cost = cost_for(&config.costs, name);
        let report = InstrumentReport::compute(
            s,
            &result.ledger,
            &result.baseline,
            &result.filtered,
            threshold,
            &cost,
        );
        let sweep = sweep_candidates(&result.ledger);
        let trades = apply_fees(&result.ledger, &cost);
        info!(
            instrument = name,
            threshold,
            scored = report.all_trades.count,
            filtered = report.filtered_trades.count,
            net_filtered_pf = report.fee_impact.net_filtered_pf,
            verdict = %report.fee_impact.verdict,
            best_threshold = sweep.best_threshold,
            "instrument evaluated"
        );
        instruments.push(InstrumentOutcome {
            instrument: name.to_string(),
            candles: s.len(),
            dataset_hash: dataset_hash(s),
            walk_forward: result,
            report,
            sweep,
            trades,
        });
    }

    let simulator = AccountSimulator::new(config.account.clone())?;
    let all_trades: Vec<NetTrade> = instruments
        .iter()
        .flat_map(|o| o.trades.iter().cloned())
        .collect();
    let account = simulator.run(&all_trades, &thresholds);
    info!(
        trades = account.summary.trade_count,
        final_balance = account.summary.final_balance,
        roi_pct = account.summary.roi_pct,
        max_drawdown_pct = account.summary.max_drawdown_pct,
        "account simulation complete"
    );

    Ok(PipelineOutput {
        run_id,
        config: config.clone(),
        instruments,
        checkpoints: pooled.checkpoints,
        account,
        last_model: pooled.last_model,
    })
}
