//! Seat forecast cycle tool.
//!
//! Subcommands cover the whole lifecycle of a forecast data directory:
//! - Bootstrap the feature store from historical baselines
//! - Train, refresh and roll back the win-probability model
//! - Run a forecast cycle over a batch of signal records
//! - Print the latest published report

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use seat_forecast::forecast::infra::init_logging;
use seat_forecast::forecast::model::{FeatureSchema, LabeledOutcome, LabeledSample};
use seat_forecast::{
    ConstituencyBaseline, Error, FeatureStore, ForecastConfig, ForecastCycle, ModelCalibrator,
    ModelRegistry, ReportStore, SignalBatch,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "forecast_cycle")]
#[command(version, about = "Election seat forecast pipeline", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "forecast.toml")]
    config: PathBuf,

    /// Override data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override log filter (e.g. "debug" or "info,seat_forecast::forecast::features=debug")
    #[arg(long)]
    log_level: Option<String>,

    /// Cycle timestamp (RFC 3339). Defaults to now.
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample config file
    InitConfig {
        #[arg(short, long, default_value = "forecast.toml")]
        output: PathBuf,
    },
    /// Create the feature store from a JSONL file of baseline rows
    Bootstrap { baselines: PathBuf },
    /// Train the first model from a JSONL file of labeled outcomes
    Train { outcomes: PathBuf },
    /// Run one forecast cycle over a JSONL file of signal records
    Run { signals: PathBuf },
    /// Retrain the active model with newly labeled outcomes
    Refresh { outcomes: PathBuf },
    /// Restore the previous model version
    Rollback,
    /// Print the latest published report
    Report,
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(cli: &Cli) -> Result<ForecastConfig, Error> {
    let mut config = ForecastConfig::load(&cli.config)?;
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    Ok(config)
}

/// Every line must parse; training and bootstrap inputs are not best-effort.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, Error> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut rows = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| {
            Error::invalid_input(format!("{}:{}: {e}", path.display(), idx + 1))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

fn read_samples(path: &Path) -> Result<Vec<LabeledSample>, Error> {
    let schema = FeatureSchema::current();
    read_jsonl::<LabeledOutcome>(path)?
        .iter()
        .map(|o| o.to_sample(&schema))
        .collect()
}

/// Signal batch for a cycle. Rejected lines are counted, not fatal.
fn read_signals(path: &Path) -> Result<SignalBatch, Error> {
    let batch = SignalBatch::read_path(path)?;
    if batch.rejected > 0 {
        warn!(rejected = batch.rejected, "Signal records rejected");
    }
    Ok(batch)
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output } = &cli.command {
        std::fs::write(output, ForecastConfig::default().to_toml()?)?;
        println!("Wrote sample config to {}", output.display());
        return Ok(());
    }

    let config = load_config(&cli)?;
    let _log_guard = init_logging(&config.logging, cli.log_level.as_deref())?;
    let as_of = cli.as_of.unwrap_or_else(Utc::now);
    let storage = config.storage.clone();

    match &cli.command {
        Commands::InitConfig { .. } => {}
        Commands::Bootstrap { baselines } => {
            let rows: Vec<ConstituencyBaseline> = read_jsonl(baselines)?;
            let store = FeatureStore::open(storage.feature_dir())?;
            let lock = store.lock_writer()?;
            let receipt = store.bootstrap(
                &lock,
                &rows,
                config.updater.initial_poll_volatility,
                as_of,
            )?;
            info!(
                rows = receipt.row_count,
                path = %receipt.latest_path.display(),
                "Feature store bootstrapped"
            );
        }
        Commands::Train { outcomes } => {
            let registry = ModelRegistry::open(storage.model_dir())?;
            if registry.latest_pointer()?.is_some() {
                return Err("a model already exists; use `refresh` to retrain".into());
            }
            let samples = read_samples(outcomes)?;
            let calibrator =
                ModelCalibrator::train_initial(samples, config.calibrator.clone(), as_of)?;
            let path = registry.save(calibrator.active(), as_of)?;
            let metrics = &calibrator.active().metrics;
            info!(
                version = %calibrator.active().version_id,
                brier = metrics.brier_score,
                accuracy = metrics.accuracy,
                path = %path.display(),
                "Initial model trained"
            );
        }
        Commands::Run { signals } => {
            let batch = read_signals(signals)?;
            let cycle = ForecastCycle::new(config)?;
            let outcome = cycle.run(&batch.records, as_of)?;
            print!("{}", outcome.report.summary());
        }
        Commands::Refresh { outcomes } => {
            let registry = ModelRegistry::open(storage.model_dir())?;
            let active = registry
                .load_latest()?
                .ok_or_else(|| Error::ModelNotFound(registry.dir().display().to_string()))?;
            let mut calibrator = ModelCalibrator::new(active, config.calibrator.clone());
            let samples = read_samples(outcomes)?;
            let version = registry.next_version()?;
            let report = calibrator.refresh(samples, version, as_of)?;
            registry.save(calibrator.active(), as_of)?;
            let pruned = registry.prune(storage.keep_model_versions)?;
            info!(
                from = report.previous_version,
                to = report.new_version,
                window = report.window_samples,
                duplicates = report.duplicates_ignored,
                brier_before = report.brier_before,
                brier_after = report.brier_after,
                pruned,
                "Model refreshed"
            );
        }
        Commands::Rollback => {
            let registry = ModelRegistry::open(storage.model_dir())?;
            let restored = registry.rollback(as_of)?;
            info!(version = %restored.version_id, "Model rolled back");
        }
        Commands::Report => {
            let reports = ReportStore::open(storage.report_dir())?;
            match reports.load_latest()? {
                Some(report) => print!("{}", report.summary()),
                None => println!("No report published yet in {}", reports.dir().display()),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(dir: &tempfile::TempDir, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn test_read_signals_counts_rejected_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_lines(
            &dir,
            "signals.jsonl",
            &[
                r#"{"scope":{"level":"constituency","id":"AC_1"},"alliance":"a","kind":"sentiment","value":0.4,"observed_at":"2024-03-01T06:00:00Z"}"#,
                "not json",
                r#"{"scope":{"level":"region","id":"North"},"alliance":"b","kind":"poll","value":140.0,"observed_at":"2024-03-01T06:00:00Z"}"#,
            ],
        );
        let batch = read_signals(&path).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.rejected, 2);
    }

    #[test]
    fn test_read_jsonl_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_lines(
            &dir,
            "baselines.jsonl",
            &[
                r#"{"constituency_id":"AC_1","region":"North","shares":{"a":45.0,"b":40.0,"others":15.0}}"#,
                "",
                r#"{"constituency_id":"AC_2"}"#,
            ],
        );
        let err = read_jsonl::<ConstituencyBaseline>(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
