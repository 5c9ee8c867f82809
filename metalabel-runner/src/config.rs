//! Serializable run configuration, loaded from a TOML run file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use metalabel_core::candidates::{GenerateError, StrategyConfig};
use metalabel_core::classifier::{ClassifierError, GbtParams};

use crate::account::{AccountError, AccountParams};
use crate::fees::{default_cost_table, CostTable};
use crate::threshold::ThresholdTable;
use crate::walk_forward::{check_threshold, WalkForwardError, WalkForwardParams};

/// Content-addressable identifier of a run configuration.
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid run file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("strategy: {0}")]
    Strategy(#[from] GenerateError),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("walk_forward: {0}")]
    WalkForward(#[from] WalkForwardError),
    #[error("account: {0}")]
    Account(#[from] AccountError),
    #[error("at least one [[instruments]] entry is required")]
    NoInstruments,
    #[error("instrument '{0}' is listed twice")]
    DuplicateInstrument(String),
    #[error("threshold for '{name}' must be in [0, 1], got {value}")]
    ThresholdOutOfRange { name: String, value: f64 },
    #[error("cost model for '{instrument}' has a fraction outside [0, 1)")]
    InvalidCost { instrument: String },
}

/// One instrument's data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSource {
    pub name: String,
    pub path: PathBuf,
}

/// Everything needed to reproduce a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub walk_forward: WalkForwardParams,
    #[serde(default)]
    pub classifier: GbtParams,
    #[serde(default)]
    pub account: AccountParams,
    pub instruments: Vec<InstrumentSource>,
    /// Per-instrument probability cutoffs overriding `walk_forward.default_threshold`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    #[serde(default = "default_cost_table")]
    pub costs: CostTable,
}

impl RunConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read and validate a run file. Relative instrument paths are resolved
    /// against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(dir) = path.parent() {
            for instrument in &mut config.instruments {
                if instrument.path.is_relative() {
                    instrument.path = dir.join(&instrument.path);
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        self.classifier.validate()?;
        self.walk_forward.validate()?;
        self.account.validate()?;

        if self.instruments.is_empty() {
            return Err(ConfigError::NoInstruments);
        }
        let mut seen = BTreeSet::new();
        for instrument in &self.instruments {
            if !seen.insert(instrument.name.as_str()) {
                return Err(ConfigError::DuplicateInstrument(instrument.name.clone()));
            }
        }
        for (name, &value) in &self.thresholds {
            if check_threshold(value).is_err() {
                return Err(ConfigError::ThresholdOutOfRange {
                    name: name.clone(),
                    value,
                });
            }
        }
        if let Some((instrument, _)) = self.costs.iter().find(|(_, c)| !c.is_valid()) {
            return Err(ConfigError::InvalidCost {
                instrument: instrument.clone(),
            });
        }
        Ok(())
    }

    /// BLAKE3 hash of the canonical JSON form.
    ///
    /// Two configs with identical contents share a run id, and so an output
    /// directory.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn threshold_table(&self) -> ThresholdTable {
        ThresholdTable::new(self.walk_forward.default_threshold, self.thresholds.clone())
    }

    pub fn instrument_names(&self) -> Vec<&str> {
        self.instruments.iter().map(|i| i.name.as_str()).collect()
    }
}
