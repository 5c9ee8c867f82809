//! Static per-instrument transaction costs in log-return space.
//!
//! A round trip pays the spread once and the overnight financing rate once
//! per night held:
//!
//! `net = gross + ln(1 - spread_fraction) + nights_held * ln(1 - overnight_fraction)`
//!
//! The cost term is never positive, so fees can only lower a return.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use metalabel_core::domain::CandidateSet;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Round-trip spread as a fraction of price.
    pub spread_fraction: f64,
    /// Financing charge per night as a fraction of price.
    pub overnight_fraction: f64,
    pub nights_held: u32,
}

impl CostModel {
    pub const ZERO: CostModel = CostModel {
        spread_fraction: 0.0,
        overnight_fraction: 0.0,
        nights_held: 0,
    };

    pub fn new(spread_fraction: f64, overnight_fraction: f64, nights_held: u32) -> Self {
        Self {
            spread_fraction,
            overnight_fraction,
            nights_held,
        }
    }

    /// Both fractions must lie in `[0, 1)`.
    pub fn is_valid(&self) -> bool {
        let ok = |f: f64| f.is_finite() && (0.0..1.0).contains(&f);
        ok(self.spread_fraction) && ok(self.overnight_fraction)
    }

    /// Total cost of one trade as a (non-positive) log return.
    pub fn log_cost(&self) -> f64 {
        (1.0 - self.spread_fraction).ln()
            + f64::from(self.nights_held) * (1.0 - self.overnight_fraction).ln()
    }

    pub fn net_return(&self, gross: f64) -> f64 {
        gross + self.log_cost()
    }
}

/// Costs keyed by instrument name.
pub type CostTable = BTreeMap<String, CostModel>;

/// Deriv CFD costs for the crypto pairs the system was built around.
pub fn default_cost_table() -> CostTable {
    let mut table = CostTable::new();
    table.insert("BTC".into(), CostModel::new(0.0010, 0.0002, 1));
    table.insert("ETH".into(), CostModel::new(0.0010, 0.0002, 1));
    table.insert("SOL".into(), CostModel::new(0.0015, 0.0003, 1));
    table
}

/// Cost model for `instrument`; zero cost (with a warning) when unknown.
pub fn cost_for(table: &CostTable, instrument: &str) -> CostModel {
    match table.get(instrument) {
        Some(model) => *model,
        None => {
            warn!(instrument, "no cost model configured, applying zero cost");
            CostModel::ZERO
        }
    }
}

/// A scored candidate with fees applied, ready for account simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetTrade {
    pub instrument: String,
    pub candidate_id: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_log_price: f64,
    pub stop_loss_level: f64,
    pub model_probability: f64,
    /// `None` for a trade still open at series end.
    pub exit_time: Option<DateTime<Utc>>,
    pub gross_return: Option<f64>,
    pub net_return: Option<f64>,
}

impl NetTrade {
    pub fn entry_price(&self) -> f64 {
        self.entry_log_price.exp()
    }

    pub fn stop_price(&self) -> f64 {
        self.stop_loss_level.exp()
    }
}

/// Apply `cost` to every scored candidate of `set`.
pub fn apply_fees(set: &CandidateSet, cost: &CostModel) -> Vec<NetTrade> {
    set.iter()
        .filter_map(|c| {
            let probability = c.model_probability?;
            let gross = c.log_return();
            Some(NetTrade {
                instrument: set.instrument.clone(),
                candidate_id: c.id,
                entry_time: c.entry_time,
                entry_log_price: c.entry_log_price,
                stop_loss_level: c.stop_loss_level,
                model_probability: probability,
                exit_time: c.exit.map(|e| e.time),
                gross_return: gross,
                net_return: gross.map(|g| cost.net_return(g)),
            })
        })
        .collect()
}
