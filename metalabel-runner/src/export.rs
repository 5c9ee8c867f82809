//! Artifact export: CSV tables, the JSON run summary and a Markdown report.
//!
//! A run directory `<output_dir>/<run_id>/` holds:
//! - `ledger_<instrument>.csv`: every candidate with its features and score
//! - `thresholds_<instrument>.csv`: the threshold sweep rows
//! - `account_history.csv`: one snapshot per settled trade
//! - `summary.json`: the `RunSummary`, with a schema version
//! - `report.md`: human-readable digest

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use metalabel_core::domain::CandidateSet;

use crate::account::AccountSnapshot;
use crate::grid::GridRow;
use crate::pipeline::{PipelineOutput, RunSummary, SCHEMA_VERSION};
use crate::threshold::ThresholdSweep;

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("failed to serialize RunSummary to JSON")
}

/// Deserialize a `RunSummary`, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<RunSummary> {
    let summary: RunSummary =
        serde_json::from_str(json).context("failed to deserialize RunSummary from JSON")?;
    if summary.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            summary.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(summary)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Ledger with one column per feature, after the fixed columns.
///
/// Prices are linear; `return` is the log return. Open trades leave the exit
/// columns empty, unscored ones leave `model_probability` empty.
pub fn export_ledger_csv(set: &CandidateSet) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header: Vec<String> = [
        "id",
        "entry_index",
        "entry_time",
        "entry_price",
        "atr",
        "take_profit",
        "stop_loss",
        "hold_deadline_index",
        "exit_index",
        "exit_time",
        "exit_price",
        "exit_reason",
        "return",
        "label",
        "model_probability",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(set.feature_names.iter().cloned());
    wtr.write_record(&header)?;

    for c in set.iter() {
        let mut row = vec![
            c.id.to_string(),
            c.entry_index.to_string(),
            c.entry_time.to_rfc3339(),
            format!("{:.6}", c.entry_price()),
            format!("{:.6}", c.atr_at_entry),
            format!("{:.6}", c.take_profit_level.exp()),
            format!("{:.6}", c.stop_price()),
            c.hold_deadline_index.to_string(),
            opt(c.exit_index()),
            opt(c.exit.map(|e| e.time.to_rfc3339())),
            opt(c.exit_log_price().map(|p| format!("{:.6}", p.exp()))),
            opt(c.exit_reason()),
            opt(c.log_return().map(|r| format!("{r:.6}"))),
            opt(c.label()),
            opt(c.model_probability.map(|p| format!("{p:.4}"))),
        ];
        row.extend(c.features.iter().map(|f| format!("{f:.6}")));
        wtr.write_record(&row)?;
    }

    finish(wtr)
}

pub fn export_thresholds_csv(sweep: &ThresholdSweep) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["threshold", "profit_factor", "win_rate", "avg_return", "count"])?;
    for r in &sweep.rows {
        wtr.write_record([
            &format!("{:.2}", r.threshold),
            &format!("{:.4}", r.profit_factor),
            &format!("{:.4}", r.win_rate),
            &format!("{:.6}", r.avg_return),
            &r.count.to_string(),
        ])?;
    }
    finish(wtr)
}

pub fn export_account_csv(history: &[AccountSnapshot]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "pair", "pnl", "balance", "position_size", "roi_pct"])?;
    for s in history {
        wtr.write_record([
            &s.date.to_rfc3339(),
            &s.pair,
            &format!("{:.2}", s.pnl),
            &format!("{:.2}", s.balance),
            &format!("{:.2}", s.position_size),
            &format!("{:.4}", s.roi_pct),
        ])?;
    }
    finish(wtr)
}

pub fn export_grid_csv(rows: &[GridRow]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "lookback",
        "hold_period",
        "tp_multiple",
        "sl_multiple",
        "profit_factor",
        "win_rate",
        "avg_return",
        "count",
    ])?;
    for r in rows {
        wtr.write_record([
            &r.lookback.to_string(),
            &r.hold_period.to_string(),
            &format!("{:.2}", r.tp_multiple),
            &format!("{:.2}", r.sl_multiple),
            &format!("{:.4}", r.profit_factor),
            &format!("{:.4}", r.win_rate),
            &format!("{:.6}", r.avg_return),
            &r.count.to_string(),
        ])?;
    }
    finish(wtr)
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write the full artifact set under `<output_dir>/<run_id>/` and return
/// that directory. An existing directory for the same run is overwritten.
pub fn save_artifacts(output: &PipelineOutput, output_dir: &Path) -> Result<PathBuf> {
    let run_dir = output_dir.join(&output.run_id);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let write = |name: String, contents: String| -> Result<()> {
        let path = run_dir.join(name);
        std::fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))
    };

    for o in &output.instruments {
        write(
            format!("ledger_{}.csv", o.instrument),
            export_ledger_csv(&o.walk_forward.ledger)?,
        )?;
        write(
            format!("thresholds_{}.csv", o.instrument),
            export_thresholds_csv(&o.sweep)?,
        )?;
    }
    write("account_history.csv".into(), export_account_csv(&output.account.history)?)?;

    let summary = output.summary();
    write("summary.json".into(), export_json(&summary)?)?;
    write("report.md".into(), generate_report(&summary))?;

    Ok(run_dir)
}

/// Load the `RunSummary` of an artifact directory.
pub fn load_summary(dir: &Path) -> Result<RunSummary> {
    let path = dir.join("summary.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

// ─── Markdown ───────────────────────────────────────────────────────

pub fn generate_report(summary: &RunSummary) -> String {
    let mut md = String::with_capacity(2048);

    md.push_str("# Meta-Labeling Run\n\n");
    md.push_str(&format!("Run id: `{}`\n\n", summary.run_id));

    md.push_str("## Walk-Forward\n\n");
    md.push_str("| Instrument | Candles | Candidates | Scored | Threshold | Filtered | Gross PF (all) | Gross PF (filtered) | Net PF (filtered) | Verdict | Best Threshold |\n");
    md.push_str("| --- | --- | --- | --- | --- | --- | --- | --- | --- | --- | --- |\n");
    for i in &summary.instruments {
        let r = &i.report;
        md.push_str(&format!(
            "| {} | {} | {} | {} | {:.2} | {} | {:.3} | {:.3} | {:.3} | {} | {:.2} |\n",
            i.instrument,
            i.candles,
            i.candidates,
            i.scored,
            r.threshold,
            r.filtered_trades.count,
            r.fee_impact.gross_baseline_pf,
            r.fee_impact.gross_filtered_pf,
            r.fee_impact.net_filtered_pf,
            r.fee_impact.verdict,
            i.best_threshold,
        ));
    }
    md.push('\n');

    md.push_str("## Signal Streams\n\n");
    md.push_str("| Instrument | Baseline PF | Baseline Time in Market | Filtered PF | Filtered Time in Market |\n");
    md.push_str("| --- | --- | --- | --- | --- |\n");
    for i in &summary.instruments {
        let r = &i.report;
        md.push_str(&format!(
            "| {} | {:.3} | {:.1}% | {:.3} | {:.1}% |\n",
            i.instrument,
            r.baseline_bars.profit_factor,
            r.baseline_bars.time_in_market * 100.0,
            r.filtered_bars.profit_factor,
            r.filtered_bars.time_in_market * 100.0,
        ));
    }
    md.push('\n');

    let trained = summary.checkpoints.iter().filter(|c| c.report.trained).count();
    md.push_str(&format!(
        "Checkpoints: {} ({} trained)\n\n",
        summary.checkpoints.len(),
        trained
    ));

    let a = &summary.account;
    md.push_str("## Account\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Initial Balance | {:.2} |\n", a.initial_balance));
    md.push_str(&format!("| Final Balance | {:.2} |\n", a.final_balance));
    md.push_str(&format!("| Net Profit | {:.2} |\n", a.net_profit));
    md.push_str(&format!("| ROI | {:.2}% |\n", a.roi_pct));
    md.push_str(&format!("| Max Drawdown | {:.2}% |\n", a.max_drawdown_pct));
    md.push_str(&format!("| Win Rate | {:.1}% |\n", a.win_rate_pct));
    md.push_str(&format!("| Trades | {} |\n", a.trade_count));
    if let (Some(first), Some(last)) = (a.first_date, a.last_date) {
        md.push_str(&format!(
            "| Period | {} to {} |\n",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        ));
    }
    md.push('\n');

    md
}
