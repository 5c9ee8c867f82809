//! End-to-end runs of the pooled pipeline on synthetic hourly data.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{Duration, TimeZone, Utc};
use metalabel_core::domain::{Candle, CandleSeries};
use metalabel_runner::export::{load_summary, save_artifacts};
use metalabel_runner::{run_on_series, run_pipeline, RunConfig};

const RUN_FILE: &str = r#"
[strategy]
type = "trendline_breakout"
lookback = 12
hold_period = 6
tp_multiple = 2.0
sl_multiple = 2.0
atr_lookback = 24

[walk_forward]
train_size = 400
step_size = 200
min_train_trades = 5

[classifier]
n_estimators = 25
max_depth = 2

[[instruments]]
name = "BTC"
path = "btc.csv"

[[instruments]]
name = "ETH"
path = "eth.csv"
"#;

/// Trending oscillation with deterministic jitter.
fn closes(n: usize, phase: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            let jitter = ((i as u64).wrapping_mul(2_654_435_761) % 1000) as f64 / 1000.0 - 0.5;
            100.0 * (0.0003 * x + 0.04 * (x / 9.0 + phase).sin() + 0.015 * (x / 4.0).cos() + 0.004 * jitter).exp()
        })
        .collect()
}

fn series(instrument: &str, n: usize, phase: f64) -> CandleSeries {
    let base = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
    let candles = closes(n, phase)
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            Candle::new(
                base + Duration::hours(i as i64),
                c,
                c * 1.004,
                c * 0.996,
                c,
                1000.0 + (i % 17) as f64 * 10.0,
            )
        })
        .collect();
    CandleSeries::new(instrument, candles).unwrap()
}

fn write_csv(path: &Path, s: &CandleSeries) {
    let mut out = String::from("date,open,high,low,close,volume\n");
    for c in s.candles() {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            c.timestamp.format("%Y-%m-%d %H:%M:%S"),
            c.open,
            c.high,
            c.low,
            c.close,
            c.volume
        )
        .unwrap();
    }
    std::fs::write(path, out).unwrap();
}

fn inputs() -> Vec<CandleSeries> {
    vec![series("BTC", 1500, 0.0), series("ETH", 1200, 1.3)]
}

#[test]
fn identical_inputs_give_identical_outputs() {
    let config = RunConfig::from_toml_str(RUN_FILE).unwrap();
    let a = run_on_series(&config, inputs()).unwrap();
    let b = run_on_series(&config, inputs()).unwrap();

    assert_eq!(a.run_id, b.run_id);
    assert_eq!(a.checkpoints, b.checkpoints);
    for (x, y) in a.instruments.iter().zip(&b.instruments) {
        assert_eq!(x.walk_forward.ledger, y.walk_forward.ledger);
        assert_eq!(x.walk_forward.filtered, y.walk_forward.filtered);
        assert_eq!(x.walk_forward.baseline, y.walk_forward.baseline);
    }
    assert_eq!(a.account, b.account);
}

#[test]
fn training_never_sees_unfinished_trades() {
    let config = RunConfig::from_toml_str(RUN_FILE).unwrap();
    let out = run_on_series(&config, inputs()).unwrap();
    let train = config.walk_forward.train_size;

    assert!(out.checkpoints.iter().any(|c| c.report.trained));
    for cp in &out.checkpoints {
        let expected: usize = out
            .instruments
            .iter()
            .map(|o| {
                o.walk_forward
                    .ledger
                    .iter()
                    .filter(|c| c.entry_index + train > cp.report.index)
                    .filter(|c| c.exit_index().is_some_and(|e| e < cp.report.index))
                    .count()
            })
            .sum();
        assert_eq!(cp.report.train_trades, expected, "checkpoint {}", cp.report.index);
    }

    let first_model = out
        .checkpoints
        .iter()
        .find(|c| c.report.trained)
        .map(|c| c.report.index)
        .unwrap();
    for o in &out.instruments {
        for c in o.walk_forward.ledger.scored() {
            assert!(c.entry_index >= first_model);
            let p = c.model_probability.unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
        assert!(o.walk_forward.filtered.entered.len() <= o.walk_forward.baseline.entered.len());
    }
}

#[test]
fn account_follows_threshold_and_floor() {
    let config = RunConfig::from_toml_str(RUN_FILE).unwrap();
    let out = run_on_series(&config, inputs()).unwrap();
    let history = &out.account.history;
    assert!(history.windows(2).all(|w| w[0].date <= w[1].date));
    assert!(history.iter().all(|s| s.balance >= config.account.balance_floor));

    let accepted: usize = out
        .instruments
        .iter()
        .map(|o| {
            o.trades
                .iter()
                .filter(|t| t.model_probability >= 0.5 && t.net_return.is_some())
                .count()
        })
        .sum();
    assert_eq!(history.len(), accepted);
    assert_eq!(out.account.summary.trade_count, accepted);
}

#[test]
fn run_file_to_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    for s in inputs() {
        write_csv(&dir.path().join(format!("{}.csv", s.instrument().to_lowercase())), &s);
    }
    let run_file = dir.path().join("run.toml");
    std::fs::write(&run_file, RUN_FILE).unwrap();

    let config = RunConfig::load(&run_file).unwrap();
    let out = run_pipeline(&config).unwrap();
    assert_eq!(out.instruments.len(), 2);
    assert_eq!(out.instruments[0].candles, 1500);
    assert_eq!(out.instruments[1].candles, 1200);

    let results = dir.path().join("results");
    let run_dir = save_artifacts(&out, &results).unwrap();
    assert_eq!(run_dir, results.join(&out.run_id));
    for name in [
        "ledger_BTC.csv",
        "ledger_ETH.csv",
        "thresholds_BTC.csv",
        "thresholds_ETH.csv",
        "account_history.csv",
        "summary.json",
        "report.md",
    ] {
        assert!(run_dir.join(name).exists(), "missing {name}");
    }

    let ledger = std::fs::read_to_string(run_dir.join("ledger_BTC.csv")).unwrap();
    assert_eq!(ledger.lines().count(), out.instruments[0].walk_forward.ledger.len() + 1);
    assert!(ledger.lines().next().unwrap().ends_with("range_position"));

    let summary = load_summary(&run_dir).unwrap();
    assert_eq!(summary.run_id, out.run_id);
    assert_eq!(summary.instruments.len(), 2);
    assert_eq!(summary.account.trade_count, out.account.summary.trade_count);
    assert_eq!(summary.checkpoints, out.checkpoints);

    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("summary.json")).unwrap()).unwrap();
    json["schema_version"] = serde_json::json!(99);
    let err = metalabel_runner::export::import_json(&json.to_string()).unwrap_err();
    assert!(err.to_string().contains("unsupported schema version"));
}

#[test]
fn missing_data_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let run_file = dir.path().join("run.toml");
    std::fs::write(&run_file, RUN_FILE).unwrap();
    let config = RunConfig::load(&run_file).unwrap();
    assert!(matches!(
        run_pipeline(&config),
        Err(metalabel_runner::PipelineError::Load(_))
    ));
}
