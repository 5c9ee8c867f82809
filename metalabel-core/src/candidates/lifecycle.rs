//! Trade lifecycle shared by every generator.
//!
//! The `Ledger` is the single writer of a `CandidateSet` during generation.
//! It holds at most one open trade; per index the caller first offers an
//! entry (ignored while a trade is open) and then runs the exit check, so a
//! trade opened on bar i is already subject to the exit rule on bar i.

use chrono::{DateTime, Utc};

use crate::domain::{CandidateSet, TradeCandidate, TradeExit, Trendline};

/// Everything a generator decides at entry time.
#[derive(Debug, Clone)]
pub struct EntryPlan {
    pub index: usize,
    pub time: DateTime<Utc>,
    pub log_price: f64,
    /// Volatility in log-return units.
    pub atr: f64,
    pub tp_multiple: f64,
    pub sl_multiple: f64,
    pub hold_period: usize,
    pub trendline: Option<Trendline>,
    pub features: Vec<f64>,
}

#[derive(Debug)]
pub struct Ledger {
    set: CandidateSet,
    open: Option<usize>,
}

impl Ledger {
    pub fn new(set: CandidateSet) -> Self {
        Self { set, open: None }
    }

    pub fn is_flat(&self) -> bool {
        self.open.is_none()
    }

    /// Open a trade from `plan`. Returns `false` (and records nothing) while
    /// another trade is still open.
    pub fn open(&mut self, plan: EntryPlan) -> bool {
        if self.open.is_some() {
            return false;
        }
        let id = self.set.candidates.len();
        self.set.candidates.push(TradeCandidate {
            id,
            entry_index: plan.index,
            entry_time: plan.time,
            entry_log_price: plan.log_price,
            atr_at_entry: plan.atr,
            take_profit_level: plan.log_price + plan.atr * plan.tp_multiple,
            stop_loss_level: plan.log_price - plan.atr * plan.sl_multiple,
            hold_deadline_index: plan.index + plan.hold_period,
            trendline: plan.trendline,
            features: plan.features,
            exit: None,
            model_probability: None,
        });
        self.open = Some(id);
        true
    }

    /// Close the open trade if the exit rule fires on this bar.
    pub fn check_exit(&mut self, index: usize, time: DateTime<Utc>, log_close: f64) {
        let Some(id) = self.open else {
            return;
        };
        let trade = &mut self.set.candidates[id];
        if let Some(reason) = trade.exit_trigger(index, log_close) {
            trade.exit = Some(TradeExit {
                index,
                time,
                log_price: log_close,
                reason,
            });
            self.open = None;
        }
    }

    /// Finish generation. A trade still open at series end keeps `exit = None`.
    pub fn finish(self) -> CandidateSet {
        self.set
    }
}
