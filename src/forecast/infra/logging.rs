//! Structured logging setup.
//!
//! Library code only emits `tracing` events; binaries call [`init_logging`]
//! once at startup.
//!
//! # Component Targets
//!
//! | Target | Description |
//! |--------|-------------|
//! | `seat_forecast::forecast::signals` | Record validation and weighting |
//! | `seat_forecast::forecast::features` | Store reads/writes and EMA updates |
//! | `seat_forecast::forecast::model` | Training, refresh, registry |
//! | `seat_forecast::forecast::simulation` | Monte Carlo runs |
//! | `seat_forecast::forecast::cycle` | Cycle milestones |
//!
//! ```bash
//! # Per-constituency update detail only
//! RUST_LOG=info,seat_forecast::forecast::features=debug forecast_cycle run ...
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// JSON format (best for log aggregation)
    Json,
    /// Compact single-line format
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,

    /// Format for stdout logging
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for daily-rotated JSON log files (disabled when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            log_dir: None,
        }
    }
}

impl LogConfig {
    /// Pretty stdout, no files.
    pub fn development() -> Self {
        Self::default()
    }

    /// JSON stdout plus rotated JSON files under `log_dir`.
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            format: LogFormat::Json,
            log_dir: Some(log_dir),
            ..Default::default()
        }
    }
}

/// Initialize the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; it must be kept
/// alive for the duration of the program so buffered lines are flushed.
pub fn init_logging(
    config: &LogConfig,
    filter_override: Option<&str>,
) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let filter = match filter_override {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?,
    };

    let stdout_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
        LogFormat::Pretty => fmt::layer().with_target(false).boxed(),
    };
    let mut layers = vec![stdout_layer];

    let mut guard = None;
    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)?;
        let appender = tracing_appender::rolling::daily(dir, "forecast.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers.with_filter(filter))
        .try_init()?;

    if let Some(dir) = &config.log_dir {
        eprintln!("File logging enabled: {}", dir.display());
    }

    Ok(guard)
}
