//! IndexFlow CLI: run the daily pipeline and inspect its outputs.
//!
//! Commands:
//! - `run` executes resolve → fetch → derive → stage → load for one run stamp
//! - `load` replays a staged artifact into the warehouse without fetching
//! - `status` reports per-symbol coverage in the warehouse and recent runs
//! - `artifacts` lists staged artifacts, newest first
//! - `init-config` prints the default configuration as TOML

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use indexflow_core::domain::{DateWindow, RunStamp};
use indexflow_core::staging::StagingStore;
use indexflow_core::warehouse::{DuckWarehouse, Warehouse, WarehouseLoader};
use indexflow_runner::{Pipeline, PipelineConfig, RunContext, RunHistory, RunReport};

#[derive(Parser)]
#[command(
    name = "indexflow",
    about = "IndexFlow: daily index-constituent price pipeline"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one pipeline run.
    Run {
        /// Run timestamp (RFC 3339, YYYYMMDDTHHMMSSZ or YYYY-MM-DD). Defaults to now.
        #[arg(long)]
        run_ts: Option<String>,

        /// Window start (YYYY-MM-DD). Defaults to run date minus lookback_days.
        #[arg(long)]
        start: Option<String>,

        /// Window end (YYYY-MM-DD). Defaults to the run date.
        #[arg(long)]
        end: Option<String>,

        /// Print the run report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Merge an already staged artifact into the warehouse.
    Load {
        /// Path to the staged prices.parquet.
        #[arg(long)]
        artifact: PathBuf,
    },
    /// Per-symbol row counts and date ranges, plus recent runs.
    Status {
        /// Number of recent runs to show.
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
    /// List staged artifacts, newest first.
    Artifacts,
    /// Print the default configuration as TOML.
    InitConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "indexflow=info".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig => {
            print!("{}", PipelineConfig::default().to_toml()?);
            Ok(())
        }
        Commands::Run {
            run_ts,
            start,
            end,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_pipeline(&config, run_ts, start, end, json)
        }
        Commands::Load { artifact } => {
            let config = load_config(cli.config.as_deref())?;
            run_load(&config, &artifact)
        }
        Commands::Status { runs } => {
            let config = load_config(cli.config.as_deref())?;
            run_status(&config, runs)
        }
        Commands::Artifacts => {
            let config = load_config(cli.config.as_deref())?;
            run_artifacts(&config)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => Ok(PipelineConfig::from_file(path)?),
        None => {
            let config = PipelineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn parse_date(flag: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("--{flag} must be YYYY-MM-DD, got '{value}'"))
}

fn build_context(
    config: &PipelineConfig,
    run_ts: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<RunContext> {
    let stamp = match run_ts {
        Some(s) => RunStamp::parse(s).map_err(|e| anyhow!(e))?,
        None => RunStamp::now(),
    };

    if start.is_none() && end.is_none() {
        return Ok(RunContext::trailing(stamp, config.fetch.lookback_days));
    }

    let default_window = DateWindow::trailing(stamp.date(), config.fetch.lookback_days);
    let start = start
        .map(|s| parse_date("start", s))
        .transpose()?
        .unwrap_or(default_window.start);
    let end = end
        .map(|s| parse_date("end", s))
        .transpose()?
        .unwrap_or(default_window.end);
    let window = DateWindow::new(start, end).map_err(|e| anyhow!(e))?;

    Ok(RunContext::new(stamp, window))
}

fn run_pipeline(
    config: &PipelineConfig,
    run_ts: Option<String>,
    start: Option<String>,
    end: Option<String>,
    json: bool,
) -> Result<()> {
    let mut ctx = build_context(config, run_ts.as_deref(), start.as_deref(), end.as_deref())?;
    let pipeline = Pipeline::from_config(config)?;
    let history = RunHistory::new(&config.history.path);

    match pipeline.run(&mut ctx) {
        Ok(report) => {
            record(&history, &report);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_summary(&report);
            }
            Ok(())
        }
        Err(err) => {
            record(&history, &err.report);
            if json {
                println!("{}", serde_json::to_string_pretty(&*err.report)?);
            }
            eprintln!("Run {} failed at {} step: {}", err.report.run_id, err.step, err.source);
            if let Some(path) = &err.artifact {
                eprintln!("Staged artifact kept at: {}", path.display());
            }
            if let Some(hint) = err.report.replay_hint() {
                eprintln!("Replay with: {hint}");
            }
            std::process::exit(1);
        }
    }
}

fn record(history: &RunHistory, report: &RunReport) {
    if let Err(e) = history.append(report) {
        tracing::warn!(path = %history.path().display(), error = %e, "could not append run history");
    }
}

fn print_summary(report: &RunReport) {
    println!("Run {} [{} .. {}]", report.run_id, report.window_start, report.window_end);
    println!("  State:      {}", report.state);
    println!("  Entities:   {}", report.entities);
    println!(
        "  Fetched:    {} ({} empty, {} failed)",
        report.fetched.len(),
        report.empty.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        println!("    {}: {}", failure.symbol, failure.error);
    }
    println!("  Batch rows: {}", report.batch_rows);
    if let Some(path) = &report.artifact {
        println!("  Artifact:   {}", path.display());
    }
    if let Some(merge) = &report.merge {
        println!("  Merged:     {} deleted, {} inserted", merge.deleted, merge.inserted);
    }
}

fn run_load(config: &PipelineConfig, artifact: &Path) -> Result<()> {
    if !artifact.is_file() {
        bail!("artifact not found: {}", artifact.display());
    }
    let store = StagingStore::new(&config.staging.root);
    let warehouse = DuckWarehouse::open(&config.warehouse.path, &config.warehouse.table)?;

    let report = WarehouseLoader::new(&store, &warehouse).load(artifact)?;

    if report.is_noop() {
        println!("Artifact {} is empty; warehouse unchanged", artifact.display());
    } else {
        println!(
            "Loaded {} rows from {} ({} replaced, {} inserted)",
            report.rows,
            artifact.display(),
            report.merge.deleted,
            report.merge.inserted
        );
    }
    Ok(())
}

fn run_status(config: &PipelineConfig, runs: usize) -> Result<()> {
    if !config.warehouse.path.exists() {
        println!("Warehouse does not exist: {}", config.warehouse.path.display());
    } else {
        let warehouse = DuckWarehouse::open(&config.warehouse.path, &config.warehouse.table)?;
        let summary = warehouse.symbol_summary()?;
        println!(
            "Warehouse: {} table {} ({} rows, {} symbols)",
            config.warehouse.path.display(),
            warehouse.table(),
            warehouse.row_count()?,
            summary.len()
        );
        println!("{:<10} {:>8}  {:<10}  {:<10}", "Symbol", "Rows", "First", "Last");
        println!("{}", "-".repeat(44));
        for s in &summary {
            println!("{:<10} {:>8}  {:<10}  {:<10}", s.symbol, s.rows, s.first.to_string(), s.last.to_string());
        }
    }

    let history = RunHistory::new(&config.history.path);
    let recent = history.recent(runs)?;
    if recent.is_empty() {
        return Ok(());
    }
    println!();
    println!("Recent runs:");
    for report in &recent {
        let outcome = match report.failed_step {
            Some(step) => format!("failed at {step}"),
            None => "ok".to_string(),
        };
        println!(
            "  {}  {:<16} rows={} failed_entities={}",
            report.run_id,
            outcome,
            report.batch_rows,
            report.failed.len()
        );
    }
    Ok(())
}

fn run_artifacts(config: &PipelineConfig) -> Result<()> {
    let store = StagingStore::new(&config.staging.root);
    let artifacts = store.list()?;
    if artifacts.is_empty() {
        println!("No staged artifacts under {}", store.root().display());
        return Ok(());
    }

    println!("{:<18} {:>8} {:>8}  {:<23}  Path", "Run", "Rows", "Symbols", "Range");
    println!("{}", "-".repeat(80));
    for artifact in &artifacts {
        let meta = &artifact.meta;
        let range = match (meta.start_date, meta.end_date) {
            (Some(start), Some(end)) => format!("{start} .. {end}"),
            _ => "-".to_string(),
        };
        println!(
            "{:<18} {:>8} {:>8}  {:<23}  {}",
            meta.run,
            meta.row_count,
            meta.symbol_count,
            range,
            artifact.path.display()
        );
    }
    Ok(())
}
