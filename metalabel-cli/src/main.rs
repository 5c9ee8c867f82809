//! Metalabel CLI: meta-labeled trendline breakout research.
//!
//! Commands:
//! - `run`: full pipeline from a TOML run file, artifacts under `--output-dir`
//! - `candidates`: generate and summarise the raw ledger of one CSV file
//! - `grid`: raw-edge parameter grid for the trendline breakout rule

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use metalabel_core::candidates::{
    CandidateGenerator, MaCrossoverParams, StrategyConfig, TrendlineBreakoutParams,
};
use metalabel_core::domain::{CandidateSet, ExitReason};
use metalabel_core::trendline::PivotTrendlineFitter;
use metalabel_runner::export::{export_grid_csv, export_ledger_csv, generate_report, save_artifacts};
use metalabel_runner::metrics::TradeStats;
use metalabel_runner::{load_csv, run_grid, run_pipeline, GridSpec, RunConfig};

#[derive(Parser)]
#[command(
    name = "metalabel",
    about = "Trendline breakout candidates filtered by a walk-forward meta-labeling classifier"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    TrendlineBreakout,
    MaCrossover,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline from a TOML run file.
    Run {
        /// Path to the run file.
        #[arg(long)]
        config: PathBuf,

        /// Artifacts go to `<output-dir>/<run_id>/`.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Generate the candidate ledger of one instrument (no model).
    Candidates {
        /// OHLCV CSV file.
        #[arg(long)]
        data: PathBuf,

        /// Instrument name. Defaults to the file stem.
        #[arg(long)]
        instrument: Option<String>,

        #[arg(long, value_enum, default_value = "trendline-breakout")]
        strategy: Strategy,

        #[arg(long, default_value_t = 72)]
        lookback: usize,

        #[arg(long, default_value_t = 168)]
        atr_lookback: usize,

        #[arg(long, default_value_t = 50)]
        fast: usize,

        #[arg(long, default_value_t = 200)]
        slow: usize,

        #[arg(long, default_value_t = 24)]
        hold: usize,

        /// Take-profit distance in ATR.
        #[arg(long, default_value_t = 3.0)]
        tp: f64,

        /// Stop-loss distance in ATR. Defaults to 3.0 for the breakout and
        /// 2.0 for the crossover.
        #[arg(long)]
        sl: Option<f64>,

        /// Write the ledger to this CSV file.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the summary as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Raw-edge parameter grid over lookback, hold, take-profit and stop-loss.
    Grid {
        /// OHLCV CSV file.
        #[arg(long)]
        data: PathBuf,

        #[arg(long, value_delimiter = ',', default_values_t = [48, 72, 96, 120])]
        lookbacks: Vec<usize>,

        #[arg(long, value_delimiter = ',', default_values_t = [12, 24, 48, 72])]
        holds: Vec<usize>,

        #[arg(long, value_delimiter = ',', default_values_t = [1.5, 2.0, 3.0])]
        tps: Vec<f64>,

        #[arg(long, value_delimiter = ',', default_values_t = [1.0, 1.5, 2.0, 3.0])]
        sls: Vec<f64>,

        #[arg(long, default_value_t = 168)]
        atr_lookback: usize,

        /// Combinations with fewer closed trades are dropped.
        #[arg(long, default_value_t = metalabel_runner::grid::MIN_GRID_TRADES)]
        min_trades: usize,

        /// Rows to print.
        #[arg(long, default_value_t = 15)]
        top: usize,

        /// Write every row to this CSV file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, output_dir } => run_cmd(&config, &output_dir),
        Commands::Candidates {
            data,
            instrument,
            strategy,
            lookback,
            atr_lookback,
            fast,
            slow,
            hold,
            tp,
            sl,
            output,
            json,
        } => {
            let strategy = match strategy {
                Strategy::TrendlineBreakout => StrategyConfig::TrendlineBreakout(TrendlineBreakoutParams {
                    lookback,
                    hold_period: hold,
                    tp_multiple: tp,
                    sl_multiple: sl.unwrap_or(3.0),
                    atr_lookback,
                }),
                Strategy::MaCrossover => StrategyConfig::MaCrossover(MaCrossoverParams {
                    fast,
                    slow,
                    hold_period: hold,
                    tp_multiple: tp,
                    sl_multiple: sl.unwrap_or(2.0),
                    ..MaCrossoverParams::default()
                }),
            };
            candidates_cmd(&data, instrument, &strategy, output.as_deref(), json)
        }
        Commands::Grid {
            data,
            lookbacks,
            holds,
            tps,
            sls,
            atr_lookback,
            min_trades,
            top,
            output,
        } => {
            let spec = GridSpec {
                lookbacks,
                hold_periods: holds,
                tp_multiples: tps,
                sl_multiples: sls,
                atr_lookback,
                min_trades,
            };
            grid_cmd(&data, &spec, top, output.as_deref())
        }
    }
}

fn instrument_name(data: &Path, instrument: Option<String>) -> String {
    instrument.unwrap_or_else(|| {
        data.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    })
}

fn run_cmd(config_path: &Path, output_dir: &Path) -> Result<()> {
    let config = RunConfig::load(config_path)
        .with_context(|| format!("failed to load run file {}", config_path.display()))?;
    let output = run_pipeline(&config).context("pipeline failed")?;

    let summary = output.summary();
    println!("{}", generate_report(&summary));

    let run_dir = save_artifacts(&output, output_dir)?;
    info!(run_id = %output.run_id, dir = %run_dir.display(), "artifacts written");
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn candidates_cmd(
    data: &Path,
    instrument: Option<String>,
    strategy: &StrategyConfig,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let name = instrument_name(data, instrument);
    let series = load_csv(data, &name).with_context(|| format!("failed to load {}", data.display()))?;
    let generator = strategy.build().context("invalid strategy parameters")?;
    let set = generator.generate(&series).context("candidate generation failed")?;

    let returns: Vec<f64> = set.closed().filter_map(|c| c.log_return()).collect();
    let stats = TradeStats::from_returns(&returns);

    if json {
        let value = serde_json::json!({
            "instrument": name,
            "generator": generator.name(),
            "candles": series.len(),
            "candidates": set.len(),
            "take_profit": count_reason(&set, ExitReason::TakeProfit),
            "stop_loss": count_reason(&set, ExitReason::StopLoss),
            "hold_deadline": count_reason(&set, ExitReason::HoldDeadline),
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{} on {} ({} candles)", generator.name(), name, series.len());
        println!("{}", "-".repeat(40));
        println!("{:<16} {:>10}", "Candidates", set.len());
        println!("{:<16} {:>10}", "Closed", stats.count);
        println!("{:<16} {:>10}", "Take-profit", count_reason(&set, ExitReason::TakeProfit));
        println!("{:<16} {:>10}", "Stop-loss", count_reason(&set, ExitReason::StopLoss));
        println!("{:<16} {:>10}", "Hold deadline", count_reason(&set, ExitReason::HoldDeadline));
        println!("{:<16} {:>10.4}", "Profit factor", stats.profit_factor);
        println!("{:<16} {:>9.1}%", "Win rate", stats.win_rate * 100.0);
        println!("{:<16} {:>10.6}", "Avg return", stats.avg_return);
    }

    if let Some(path) = output {
        std::fs::write(path, export_ledger_csv(&set)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Ledger saved to: {}", path.display());
    }
    Ok(())
}

fn count_reason(set: &CandidateSet, reason: ExitReason) -> usize {
    set.iter().filter(|c| c.exit_reason() == Some(reason)).count()
}

fn grid_cmd(data: &Path, spec: &GridSpec, top: usize, output: Option<&Path>) -> Result<()> {
    let name = instrument_name(data, None);
    let series = load_csv(data, &name).with_context(|| format!("failed to load {}", data.display()))?;
    let rows = run_grid(&series, spec, &PivotTrendlineFitter).context("parameter grid failed")?;

    println!(
        "{} combinations, {} with at least {} trades",
        spec.size(),
        rows.len(),
        spec.min_trades
    );
    println!(
        "{:>8} {:>6} {:>5} {:>5} {:>8} {:>8} {:>10} {:>6}",
        "Lookback", "Hold", "TP", "SL", "PF", "WinRate", "AvgTrade", "N"
    );
    println!("{}", "-".repeat(64));
    for r in rows.iter().take(top) {
        println!(
            "{:>8} {:>6} {:>5.1} {:>5.1} {:>8.4} {:>8.4} {:>10.6} {:>6}",
            r.lookback, r.hold_period, r.tp_multiple, r.sl_multiple, r.profit_factor, r.win_rate, r.avg_return, r.count
        );
    }

    if let Some(path) = output {
        std::fs::write(path, export_grid_csv(&rows)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Grid saved to: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn grid_lists_parse_comma_separated() {
        let cli = Cli::try_parse_from([
            "metalabel", "grid", "--data", "btc.csv", "--lookbacks", "24,48", "--tps", "1.5,2",
        ])
        .unwrap();
        match cli.command {
            Commands::Grid { lookbacks, tps, holds, .. } => {
                assert_eq!(lookbacks, vec![24, 48]);
                assert_eq!(tps, vec![1.5, 2.0]);
                assert_eq!(holds, vec![12, 24, 48, 72]);
            }
            _ => panic!("expected grid"),
        }
    }

    #[test]
    fn instrument_defaults_to_file_stem() {
        assert_eq!(instrument_name(Path::new("data/BTCUSDT3600.csv"), None), "BTCUSDT3600");
        assert_eq!(instrument_name(Path::new("x.csv"), Some("BTC".into())), "BTC");
    }
}
