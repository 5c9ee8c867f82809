//! Money management: replays an account balance over fee-adjusted trades.
//!
//! Cash is realised at exit, so trades are settled in exit-time order. Each
//! trade risks a fixed fraction of the current balance at its stop-loss
//! distance, capped by a leverage limit, and the balance never drops below
//! the liquidation floor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::fees::NetTrade;
use crate::threshold::ThresholdTable;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccountError {
    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("risk_per_trade must be in (0, 1], got {0}")]
    RiskOutOfRange(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountParams {
    pub initial_balance: f64,
    /// Fraction of the balance lost if the stop-loss is hit.
    pub risk_per_trade: f64,
    /// Position size cap as a multiple of the balance.
    pub max_leverage: f64,
    /// Floor on the stop distance as a fraction of the entry price.
    pub min_stop_distance: f64,
    /// The balance never drops below this value.
    pub balance_floor: f64,
}

impl Default for AccountParams {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            risk_per_trade: 0.03,
            max_leverage: 3.0,
            min_stop_distance: 0.005,
            balance_floor: 1.0,
        }
    }
}

impl AccountParams {
    pub fn validate(&self) -> Result<(), AccountError> {
        let positive = [
            ("initial_balance", self.initial_balance),
            ("max_leverage", self.max_leverage),
            ("min_stop_distance", self.min_stop_distance),
            ("balance_floor", self.balance_floor),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(AccountError::NonPositive { name, value });
            }
        }
        if !(self.risk_per_trade > 0.0 && self.risk_per_trade <= 1.0) {
            return Err(AccountError::RiskOutOfRange(self.risk_per_trade));
        }
        Ok(())
    }
}

/// Account state after settling one trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub date: DateTime<Utc>,
    pub pair: String,
    pub pnl: f64,
    pub balance: f64,
    pub position_size: f64,
    /// Net trade return in percent.
    pub roi_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub net_profit: f64,
    pub roi_pct: f64,
    /// Deepest peak-to-trough fall of the balance path, as a negative percent.
    pub max_drawdown_pct: f64,
    pub win_rate_pct: f64,
    pub trade_count: usize,
    pub first_date: Option<DateTime<Utc>>,
    pub last_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSimulation {
    pub history: Vec<AccountSnapshot>,
    pub summary: AccountSummary,
}

#[derive(Debug, Clone)]
pub struct AccountSimulator {
    params: AccountParams,
}

impl AccountSimulator {
    pub fn new(params: AccountParams) -> Result<Self, AccountError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &AccountParams {
        &self.params
    }

    /// Stop distance as a fraction of entry, floored at `min_stop_distance`.
    pub fn stop_distance(&self, entry_price: f64, stop_price: f64) -> f64 {
        let raw = ((entry_price - stop_price) / entry_price).abs();
        raw.max(self.params.min_stop_distance)
    }

    /// Notional that loses `risk_per_trade` of `balance` at the stop,
    /// capped at `balance * max_leverage`.
    pub fn position_size(&self, balance: f64, entry_price: f64, stop_price: f64) -> f64 {
        let at_risk = balance * self.params.risk_per_trade;
        let size = at_risk / self.stop_distance(entry_price, stop_price);
        size.min(balance * self.params.max_leverage)
    }

    /// Settle the trades that pass their instrument's threshold.
    ///
    /// Trades without an exit are dropped with a warning.
    pub fn run(&self, trades: &[NetTrade], thresholds: &ThresholdTable) -> AccountSimulation {
        let accepted: Vec<&NetTrade> = trades
            .iter()
            .filter(|t| t.model_probability >= thresholds.for_instrument(&t.instrument))
            .collect();
        let mut settled: Vec<(&NetTrade, DateTime<Utc>, f64)> = accepted
            .iter()
            .filter_map(|t| Some((*t, t.exit_time?, t.net_return?)))
            .collect();
        let dropped = accepted.len() - settled.len();
        if dropped > 0 {
            warn!(dropped, "dropping accepted trades still open at series end");
        }
        settled.sort_by_key(|(_, exit_time, _)| *exit_time);

        let mut balance = self.params.initial_balance;
        let mut history = Vec::with_capacity(settled.len());
        for (trade, exit_time, net) in settled {
            let position_size = self.position_size(balance, trade.entry_price(), trade.stop_price());
            let trade_return = net.exp() - 1.0;
            let pnl = position_size * trade_return;
            balance = (balance + pnl).max(self.params.balance_floor);
            history.push(AccountSnapshot {
                date: exit_time,
                pair: trade.instrument.clone(),
                pnl,
                balance,
                position_size,
                roi_pct: trade_return * 100.0,
            });
        }

        let summary = summarize(self.params.initial_balance, &history);
        AccountSimulation { history, summary }
    }
}

fn summarize(initial_balance: f64, history: &[AccountSnapshot]) -> AccountSummary {
    let final_balance = history.last().map_or(initial_balance, |s| s.balance);
    let net_profit = final_balance - initial_balance;

    let mut peak = initial_balance;
    let mut max_drawdown_pct: f64 = 0.0;
    for snap in history {
        peak = peak.max(snap.balance);
        max_drawdown_pct = max_drawdown_pct.min((snap.balance - peak) / peak * 100.0);
    }

    let wins = history.iter().filter(|s| s.pnl > 0.0).count();
    let win_rate_pct = if history.is_empty() {
        0.0
    } else {
        wins as f64 / history.len() as f64 * 100.0
    };

    AccountSummary {
        initial_balance,
        final_balance,
        net_profit,
        roi_pct: net_profit / initial_balance * 100.0,
        max_drawdown_pct,
        win_rate_pct,
        trade_count: history.len(),
        first_date: history.first().map(|s| s.date),
        last_date: history.last().map(|s| s.date),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn trade(instrument: &str, hour: i64, net: Option<f64>, stop_fraction: f64, p: f64) -> NetTrade {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry: f64 = 100.0;
        NetTrade {
            instrument: instrument.into(),
            candidate_id: hour as usize,
            entry_time: t0,
            entry_log_price: entry.ln(),
            stop_loss_level: (entry * (1.0 - stop_fraction)).ln(),
            model_probability: p,
            exit_time: net.map(|_| t0 + Duration::hours(hour)),
            gross_return: net,
            net_return: net,
        }
    }

    fn simulator() -> AccountSimulator {
        AccountSimulator::new(AccountParams::default()).unwrap()
    }

    #[test]
    fn risk_sizing_and_pnl() {
        // 2% stop: 300 at risk / 0.02 = 15_000 notional, under the 30_000 cap.
        let sim = simulator();
        let result = sim.run(&[trade("BTC", 1, Some(0.01), 0.02, 0.9)], &ThresholdTable::default());
        let snap = &result.history[0];
        assert!((snap.position_size - 15_000.0).abs() < 1e-6);
        let expected_pnl = 15_000.0 * (0.01f64.exp() - 1.0);
        assert!((snap.pnl - expected_pnl).abs() < 1e-6);
        assert!((snap.balance - (10_000.0 + expected_pnl)).abs() < 1e-6);
        assert!((snap.roi_pct - (0.01f64.exp() - 1.0) * 100.0).abs() < 1e-9);
    }

    #[test]
    fn stop_distance_floor_applies() {
        let sim = simulator();
        // 0.1% stop is below the 0.5% floor.
        assert!((sim.stop_distance(100.0, 99.9) - 0.005).abs() < 1e-12);
        // 300 / 0.005 = 60_000 is capped at 3x balance.
        assert!((sim.position_size(10_000.0, 100.0, 99.9) - 30_000.0).abs() < 1e-9);
    }

    #[test]
    fn floor_used_when_stop_tighter() {
        let params = AccountParams {
            max_leverage: 100.0,
            ..AccountParams::default()
        };
        let sim = AccountSimulator::new(params).unwrap();
        // Uncapped: 300 / 0.005, not 300 / 0.001.
        assert!((sim.position_size(10_000.0, 100.0, 99.9) - 60_000.0).abs() < 1e-6);
    }

    #[test]
    fn settles_in_exit_order_and_filters() {
        let mut overrides = std::collections::BTreeMap::new();
        overrides.insert("ETH".to_string(), 0.7);
        let thresholds = ThresholdTable::new(0.5, overrides);
        let trades = vec![
            trade("BTC", 5, Some(0.02), 0.02, 0.6),
            trade("ETH", 2, Some(0.01), 0.02, 0.65), // below ETH's 0.7
            trade("BTC", 3, Some(-0.01), 0.02, 0.55),
            trade("BTC", 9, None, 0.02, 0.9),        // still open
            trade("BTC", 1, Some(0.03), 0.02, 0.4),  // below default
        ];
        let result = simulator().run(&trades, &thresholds);
        assert_eq!(result.history.len(), 2);
        assert!(result.history[0].pnl < 0.0);
        assert!(result.history[1].pnl > 0.0);
        assert!(result.history[0].date < result.history[1].date);
        assert_eq!(result.summary.trade_count, 2);
        assert!((result.summary.win_rate_pct - 50.0).abs() < 1e-9);
        assert!(result.summary.max_drawdown_pct < 0.0);
    }

    #[test]
    fn empty_run_keeps_initial_balance() {
        let result = simulator().run(&[], &ThresholdTable::default());
        assert!(result.history.is_empty());
        assert_eq!(result.summary.final_balance, 10_000.0);
        assert_eq!(result.summary.max_drawdown_pct, 0.0);
        assert_eq!(result.summary.win_rate_pct, 0.0);
        assert_eq!(result.summary.first_date, None);
    }

    #[test]
    fn invalid_params_rejected() {
        let bad = AccountParams {
            risk_per_trade: 0.0,
            ..AccountParams::default()
        };
        assert_eq!(AccountSimulator::new(bad).unwrap_err(), AccountError::RiskOutOfRange(0.0));
        let bad = AccountParams {
            max_leverage: -1.0,
            ..AccountParams::default()
        };
        assert!(AccountSimulator::new(bad).is_err());
    }

    proptest! {
        #[test]
        fn balance_never_below_floor(
            returns in prop::collection::vec(-3.0..0.5_f64, 1..40),
            stop in 0.0001..0.2_f64,
        ) {
            let trades: Vec<NetTrade> = returns
                .iter()
                .enumerate()
                .map(|(i, &r)| trade("BTC", i as i64 + 1, Some(r), stop, 0.9))
                .collect();
            let result = simulator().run(&trades, &ThresholdTable::default());
            for snap in &result.history {
                prop_assert!(snap.balance >= 1.0);
            }
        }

        #[test]
        fn position_never_exceeds_leverage_cap(
            balance in 1.0..1e7_f64,
            stop_fraction in 0.0..0.5_f64,
        ) {
            let sim = simulator();
            let size = sim.position_size(balance, 100.0, 100.0 * (1.0 - stop_fraction));
            prop_assert!(size <= balance * 3.0 * (1.0 + 1e-12));
            prop_assert!(size > 0.0);
        }
    }
}
