//! TradeCandidate: one detected breakout, from entry through exit and scoring.
//!
//! A candidate is created by a candidate generator with its feature vector
//! frozen, closed exactly once, and later given a model probability by the
//! walk-forward engine. `CandidateSet` is the ordered ledger for one series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which exit rule closed a trade.
///
/// When several rules trigger on the same bar the attribution follows the
/// check order: take-profit, then stop-loss, then hold deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    HoldDeadline,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::HoldDeadline => "hold_deadline",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coefficients of a fitted line `y = intercept + slope * x`, with `x = 0`
/// at the first point of the fitted window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trendline {
    pub slope: f64,
    pub intercept: f64,
}

impl Trendline {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    /// Line value at window offset `x`.
    pub fn value_at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Where and why a trade closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeExit {
    pub index: usize,
    pub time: DateTime<Utc>,
    pub log_price: f64,
    pub reason: ExitReason,
}

/// A single detected trade, in log-price space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCandidate {
    /// Position in the instrument's ledger.
    pub id: usize,

    // ── Entry ──
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_log_price: f64,
    pub atr_at_entry: f64,

    // ── Bounds ──
    pub take_profit_level: f64,
    pub stop_loss_level: f64,
    pub hold_deadline_index: usize,

    /// Resistance line that triggered the entry, if the strategy fits one.
    pub trendline: Option<Trendline>,
    pub features: Vec<f64>,

    // ── Filled later ──
    pub exit: Option<TradeExit>,
    pub model_probability: Option<f64>,
}

impl TradeCandidate {
    pub fn is_closed(&self) -> bool {
        self.exit.is_some()
    }

    pub fn exit_index(&self) -> Option<usize> {
        self.exit.map(|e| e.index)
    }

    pub fn exit_log_price(&self) -> Option<f64> {
        self.exit.map(|e| e.log_price)
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit.map(|e| e.reason)
    }

    /// Exit minus entry log price; `None` while the trade is open.
    pub fn log_return(&self) -> Option<f64> {
        self.exit.map(|e| e.log_price - self.entry_log_price)
    }

    /// Binary outcome: 1 when the realized return is positive.
    pub fn label(&self) -> Option<u8> {
        self.log_return().map(|r| u8::from(r > 0.0))
    }

    /// Exit rule triggered at `index` with closing log price `log_close`.
    ///
    /// Shared by the generator and by every walk-forward signal stream so a
    /// trade closes on the same bar wherever it is tracked.
    pub fn exit_trigger(&self, index: usize, log_close: f64) -> Option<ExitReason> {
        if log_close >= self.take_profit_level {
            Some(ExitReason::TakeProfit)
        } else if log_close <= self.stop_loss_level {
            Some(ExitReason::StopLoss)
        } else if index >= self.hold_deadline_index {
            Some(ExitReason::HoldDeadline)
        } else {
            None
        }
    }

    /// Linear entry price.
    pub fn entry_price(&self) -> f64 {
        self.entry_log_price.exp()
    }

    /// Linear stop-loss price.
    pub fn stop_price(&self) -> f64 {
        self.stop_loss_level.exp()
    }
}

/// Ordered trade ledger of one instrument plus its feature schema.
///
/// The feature matrix and label vector are always derived from the ledger
/// itself, so rows cannot drift out of alignment with the trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub instrument: String,
    pub feature_names: Vec<String>,
    pub candidates: Vec<TradeCandidate>,
}

impl CandidateSet {
    pub fn new(instrument: impl Into<String>, feature_names: Vec<String>) -> Self {
        Self {
            instrument: instrument.into(),
            feature_names,
            candidates: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TradeCandidate> {
        self.candidates.iter()
    }

    /// Completed trades only.
    pub fn closed(&self) -> impl Iterator<Item = &TradeCandidate> {
        self.candidates.iter().filter(|c| c.is_closed())
    }

    /// Feature rows, one per candidate, in ledger order.
    pub fn features(&self) -> Vec<&[f64]> {
        self.candidates.iter().map(|c| c.features.as_slice()).collect()
    }

    /// Labels aligned with `features()`; open trades have none.
    pub fn labels(&self) -> Vec<Option<u8>> {
        self.candidates.iter().map(|c| c.label()).collect()
    }

    /// Closed trades strictly inside the trailing window ending at `now`.
    ///
    /// A trade qualifies when `entry_index > now - window` and it exited
    /// strictly before `now`. Open trades never qualify.
    pub fn training_window(&self, now: usize, window: usize) -> impl Iterator<Item = &TradeCandidate> {
        let start = now as i64 - window as i64;
        self.candidates.iter().filter(move |c| {
            (c.entry_index as i64) > start && c.exit_index().is_some_and(|exit| exit < now)
        })
    }

    /// Scored candidates (model probability attached).
    pub fn scored(&self) -> impl Iterator<Item = &TradeCandidate> {
        self.candidates.iter().filter(|c| c.model_probability.is_some())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_candidate(id: usize, entry: usize, exit: Option<usize>) -> TradeCandidate {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TradeCandidate {
            id,
            entry_index: entry,
            entry_time: t0,
            entry_log_price: 4.6,
            atr_at_entry: 0.01,
            take_profit_level: 4.63,
            stop_loss_level: 4.57,
            hold_deadline_index: entry + 12,
            trendline: Some(Trendline::new(0.001, 4.5)),
            features: vec![id as f64, 1.0],
            exit: exit.map(|index| TradeExit {
                index,
                time: t0,
                log_price: 4.61,
                reason: ExitReason::HoldDeadline,
            }),
            model_probability: None,
        }
    }

    #[test]
    fn exit_priority_take_profit_first() {
        let c = sample_candidate(0, 10, None);
        // Above take-profit on the deadline bar: take-profit wins.
        assert_eq!(c.exit_trigger(22, 4.64), Some(ExitReason::TakeProfit));
        assert_eq!(c.exit_trigger(15, 4.56), Some(ExitReason::StopLoss));
        assert_eq!(c.exit_trigger(22, 4.60), Some(ExitReason::HoldDeadline));
        assert_eq!(c.exit_trigger(15, 4.60), None);
    }

    #[test]
    fn return_and_label() {
        let open = sample_candidate(0, 10, None);
        assert_eq!(open.log_return(), None);
        assert_eq!(open.label(), None);

        let closed = sample_candidate(1, 10, Some(14));
        assert!((closed.log_return().unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(closed.label(), Some(1));
    }

    #[test]
    fn training_window_excludes_exit_at_checkpoint() {
        let mut set = CandidateSet::new("BTC", vec!["a".into(), "b".into()]);
        set.candidates.push(sample_candidate(0, 5, Some(20)));
        set.candidates.push(sample_candidate(1, 25, Some(40)));
        set.candidates.push(sample_candidate(2, 45, Some(50)));
        set.candidates.push(sample_candidate(3, 55, None));

        let ids: Vec<usize> = set.training_window(50, 40).map(|c| c.id).collect();
        // 0: entry 5 is not > 10. 2: exits exactly at the checkpoint. 3: open.
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn features_and_labels_align() {
        let mut set = CandidateSet::new("BTC", vec!["a".into(), "b".into()]);
        set.candidates.push(sample_candidate(0, 5, Some(9)));
        set.candidates.push(sample_candidate(1, 12, None));
        assert_eq!(set.features().len(), set.labels().len());
        assert_eq!(set.labels(), vec![Some(1), None]);
        assert_eq!(set.closed().count(), 1);
    }
}
