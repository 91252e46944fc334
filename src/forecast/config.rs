//! Configuration for the forecasting engine.
//!
//! One immutable [`ForecastConfig`] is built at startup (usually from
//! `forecast.toml`), validated once, and handed by reference to each stage.
//! Every section has a `Default` so a partial TOML file is enough.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::infra::logging::LogConfig;
use crate::{Error, Result};

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ForecastConfig {
    /// Display names for the alliances in reports.
    pub alliances: AllianceNames,
    /// Signal weighting.
    pub aggregator: AggregatorConfig,
    /// EMA smoothing and feature bounds.
    pub updater: UpdaterConfig,
    /// Classifier training and refresh.
    pub calibrator: CalibratorConfig,
    /// Monte Carlo simulation.
    pub simulation: SimulationConfig,
    /// On-disk layout and retention.
    pub storage: StorageConfig,
    /// Logging output.
    pub logging: LogConfig,
}

impl ForecastConfig {
    /// Load from a TOML file, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: ForecastConfig = toml::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as pretty TOML (used to write a sample config).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::invalid_config(e.to_string()))
    }

    /// Check every section for values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.aggregator.validate()?;
        self.updater.validate()?;
        self.calibrator.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

/// Report labels for the three blocs.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AllianceNames {
    pub a: String,
    pub b: String,
    pub others: String,
}

impl Default for AllianceNames {
    fn default() -> Self {
        Self {
            a: "Alliance A".to_string(),
            b: "Alliance B".to_string(),
            others: "Others".to_string(),
        }
    }
}

/// Signal weighting parameters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Recency half-life in days: weight = 0.5^(age / half_life).
    /// Default: 14.0
    pub half_life_days: f64,

    /// Records older than this are ignored entirely.
    /// Default: Some(60.0)
    pub max_age_days: Option<f64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            half_life_days: 14.0,
            max_age_days: Some(60.0),
        }
    }
}

impl AggregatorConfig {
    fn validate(&self) -> Result<()> {
        if !(self.half_life_days.is_finite() && self.half_life_days > 0.0) {
            return Err(Error::invalid_config(format!(
                "aggregator.half_life_days must be > 0, got {}",
                self.half_life_days
            )));
        }
        if let Some(max_age) = self.max_age_days {
            if !(max_age.is_finite() && max_age > 0.0) {
                return Err(Error::invalid_config(format!(
                    "aggregator.max_age_days must be > 0, got {max_age}"
                )));
            }
        }
        Ok(())
    }
}

/// Closed interval a feature is clipped into.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clip into the interval. NaN collapses to the midpoint so that a
    /// poisoned value can never be stored.
    #[inline]
    pub fn clip(&self, value: f64) -> f64 {
        if value.is_nan() {
            return (self.min + self.max) / 2.0;
        }
        value.clamp(self.min, self.max)
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Declared bounds for every smoothed feature.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FeatureBounds {
    /// Default: [-1, 1]
    pub sentiment: Bound,
    /// A-minus-B lead in percentage points. Default: [-50, 50]
    pub poll_lead: Bound,
    /// Default: [-20, 20]
    pub poll_momentum: Bound,
    /// Default: [0, 20]
    pub poll_volatility: Bound,
}

impl Default for FeatureBounds {
    fn default() -> Self {
        Self {
            sentiment: Bound::new(-1.0, 1.0),
            poll_lead: Bound::new(-50.0, 50.0),
            poll_momentum: Bound::new(-20.0, 20.0),
            poll_volatility: Bound::new(0.0, 20.0),
        }
    }
}

/// Feature updater parameters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpdaterConfig {
    /// EMA weight on new sentiment signal, in (0, 1].
    /// Default: 0.3
    pub sentiment_alpha: f64,

    /// EMA weight on new poll signal, in (0, 1].
    /// Default: 0.3
    pub poll_alpha: f64,

    /// Share of the regional shift applied to constituencies without direct
    /// coverage, in [0, 1].
    /// Default: 0.5
    pub regional_fraction: f64,

    /// Poll volatility assigned at bootstrap (percentage points).
    /// Default: 2.5
    pub initial_poll_volatility: f64,

    pub bounds: FeatureBounds,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            sentiment_alpha: 0.3,
            poll_alpha: 0.3,
            regional_fraction: 0.5,
            initial_poll_volatility: 2.5,
            bounds: FeatureBounds::default(),
        }
    }
}

impl UpdaterConfig {
    fn validate(&self) -> Result<()> {
        for (name, alpha) in [
            ("sentiment_alpha", self.sentiment_alpha),
            ("poll_alpha", self.poll_alpha),
        ] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(Error::invalid_config(format!(
                    "updater.{name} must be in (0, 1], got {alpha}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.regional_fraction) {
            return Err(Error::invalid_config(format!(
                "updater.regional_fraction must be in [0, 1], got {}",
                self.regional_fraction
            )));
        }
        let b = &self.bounds;
        for (name, bound) in [
            ("sentiment", b.sentiment),
            ("poll_lead", b.poll_lead),
            ("poll_momentum", b.poll_momentum),
            ("poll_volatility", b.poll_volatility),
        ] {
            if !(bound.min.is_finite() && bound.max.is_finite() && bound.min < bound.max) {
                return Err(Error::invalid_config(format!(
                    "updater.bounds.{name} must satisfy min < max, got [{}, {}]",
                    bound.min, bound.max
                )));
            }
        }
        Ok(())
    }
}

/// Classifier training / refresh parameters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CalibratorConfig {
    /// Sliding window: most recent N labeled samples used by a refresh.
    /// Default: 500
    pub window_size: usize,

    /// Minimum samples required to train.
    /// Default: 10
    pub min_samples: usize,

    /// Gradient descent step size.
    /// Default: 0.1
    pub learning_rate: f64,

    /// Full-batch gradient descent passes.
    /// Default: 400
    pub epochs: usize,

    /// L2 penalty on standardized weights.
    /// Default: 0.01
    pub l2_penalty: f64,

    /// Raw-score grid used to re-validate calibration monotonicity.
    /// Default: 101
    pub monotonic_grid_points: usize,

    /// Candidates whose in-sample Brier score exceeds this are rejected.
    /// 0.25 is a constant 0.5 forecast.
    /// Default: 0.25
    pub max_brier_score: f64,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            window_size: 500,
            min_samples: 10,
            learning_rate: 0.1,
            epochs: 400,
            l2_penalty: 0.01,
            monotonic_grid_points: 101,
            max_brier_score: 0.25,
        }
    }
}

impl CalibratorConfig {
    fn validate(&self) -> Result<()> {
        if self.min_samples < 2 || self.window_size < self.min_samples {
            return Err(Error::invalid_config(format!(
                "calibrator requires 2 <= min_samples <= window_size, got {} / {}",
                self.min_samples, self.window_size
            )));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::invalid_config("calibrator.learning_rate must be > 0"));
        }
        if !(self.l2_penalty.is_finite() && self.l2_penalty >= 0.0) {
            return Err(Error::invalid_config("calibrator.l2_penalty must be >= 0"));
        }
        if self.epochs == 0 || self.monotonic_grid_points < 2 {
            return Err(Error::invalid_config(
                "calibrator.epochs must be > 0 and monotonic_grid_points >= 2",
            ));
        }
        if !(self.max_brier_score > 0.0 && self.max_brier_score <= 1.0) {
            return Err(Error::invalid_config(
                "calibrator.max_brier_score must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Monte Carlo simulation parameters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of simulated elections.
    /// Default: 5000
    pub n_simulations: usize,

    /// Master seed; every simulation derives its own sub-stream from it.
    /// Default: 42
    pub seed: u64,

    /// Std dev of the national swing (probability units).
    /// Default: 0.01
    pub national_shock_sd: f64,

    /// Std dev of each regional swing (probability units).
    /// Default: 0.02
    pub regional_shock_sd: f64,

    /// Worker threads (None = rayon default).
    /// Default: None
    pub workers: Option<usize>,

    /// Shocked probabilities are clipped into [floor, ceiling].
    /// Default: 0.01 / 0.99
    pub probability_floor: f64,
    pub probability_ceiling: f64,

    /// Seats needed for a majority (None = floor(n/2) + 1).
    pub majority_seats: Option<u32>,

    /// Seats needed for a strong majority (None = ceil(2n/3)).
    pub strong_majority_seats: Option<u32>,

    /// How far (pp) the Others baseline share may trail the leading alliance
    /// before Others stop contesting the seat.
    /// Default: 10.0
    pub others_contention_margin_pp: f64,

    /// Maximum Monte Carlo standard error on the majority probability for
    /// the run to count as converged.
    /// Default: 0.01
    pub convergence_tolerance: f64,

    /// Seat bands for the landslide / comfortable scenarios.
    pub scenario_bands: ScenarioBands,

    /// Re-runs of the simulation under perturbed assumptions.
    pub sensitivity: SensitivityConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_simulations: 5000,
            seed: 42,
            national_shock_sd: 0.01,
            regional_shock_sd: 0.02,
            workers: None,
            probability_floor: 0.01,
            probability_ceiling: 0.99,
            majority_seats: None,
            strong_majority_seats: None,
            others_contention_margin_pp: 10.0,
            convergence_tolerance: 0.01,
            scenario_bands: ScenarioBands::default(),
            sensitivity: SensitivityConfig::default(),
        }
    }
}

impl SimulationConfig {
    fn validate(&self) -> Result<()> {
        if self.n_simulations == 0 {
            return Err(Error::invalid_config("simulation.n_simulations must be > 0"));
        }
        for (name, sd) in [
            ("national_shock_sd", self.national_shock_sd),
            ("regional_shock_sd", self.regional_shock_sd),
        ] {
            if !(sd.is_finite() && sd >= 0.0) {
                return Err(Error::invalid_config(format!(
                    "simulation.{name} must be >= 0, got {sd}"
                )));
            }
        }
        if !(self.probability_floor > 0.0
            && self.probability_floor < self.probability_ceiling
            && self.probability_ceiling < 1.0)
        {
            return Err(Error::invalid_config(format!(
                "simulation requires 0 < floor < ceiling < 1, got {} / {}",
                self.probability_floor, self.probability_ceiling
            )));
        }
        if self.workers == Some(0) {
            return Err(Error::invalid_config("simulation.workers must be > 0"));
        }
        if !(self.others_contention_margin_pp.is_finite() && self.others_contention_margin_pp > 0.0)
        {
            return Err(Error::invalid_config(
                "simulation.others_contention_margin_pp must be > 0",
            ));
        }
        self.scenario_bands.validate()?;
        self.sensitivity.validate()?;
        Ok(())
    }

    /// Majority and strong-majority seat thresholds for a legislature of
    /// `total_seats`.
    pub fn thresholds(&self, total_seats: u32) -> Result<(u32, u32)> {
        let majority = self.majority_seats.unwrap_or(total_seats / 2 + 1);
        let strong = self
            .strong_majority_seats
            .unwrap_or((2 * total_seats).div_ceil(3));
        if majority == 0 || majority > total_seats || strong < majority || strong > total_seats {
            return Err(Error::invalid_config(format!(
                "seat thresholds {majority}/{strong} invalid for {total_seats} seats"
            )));
        }
        Ok((majority, strong))
    }
}

/// Seat shares that define the scenario bands, as fractions of all seats.
///
/// A bloc is in the band when it wins at least `ceil(share * seats)`; a band
/// never sits below the majority line.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScenarioBands {
    /// Default: 0.74
    pub landslide_share: f64,

    /// Default: 0.615
    pub comfortable_share: f64,
}

impl Default for ScenarioBands {
    fn default() -> Self {
        Self {
            landslide_share: 0.74,
            comfortable_share: 0.615,
        }
    }
}

impl ScenarioBands {
    fn validate(&self) -> Result<()> {
        if !(self.comfortable_share > 0.5
            && self.comfortable_share <= self.landslide_share
            && self.landslide_share <= 1.0)
        {
            return Err(Error::invalid_config(format!(
                "scenario bands require 0.5 < comfortable <= landslide <= 1, got {} / {}",
                self.comfortable_share, self.landslide_share
            )));
        }
        Ok(())
    }

    /// (comfortable, landslide) seat counts for a legislature of `total_seats`.
    pub fn seats(&self, total_seats: u32, majority_seats: u32) -> (u32, u32) {
        let at_least = |share: f64| (share * f64::from(total_seats)).ceil() as u32;
        let comfortable = at_least(self.comfortable_share).max(majority_seats);
        let landslide = at_least(self.landslide_share).max(comfortable);
        (comfortable, landslide)
    }
}

/// Sensitivity analysis: the simulation re-run with one assumption varied.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SensitivityConfig {
    /// Run the analysis as part of every cycle.
    /// Default: true
    pub enabled: bool,

    /// Simulations per level.
    /// Default: 1000
    pub n_simulations: usize,

    /// Multipliers applied to both shock std devs.
    /// Default: [0.5, 0.75, 1.0, 1.25, 1.5]
    pub uncertainty_levels: Vec<f64>,

    /// Multipliers applied to the regional shock std dev only.
    /// Default: [0.0, 0.5, 1.0, 1.5, 2.0]
    pub correlation_levels: Vec<f64>,

    /// Uniform shift of every seat's P(A), in percentage points.
    /// Default: [-3, -2, -1, 0, 1, 2, 3]
    pub national_swing_levels_pp: Vec<f64>,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            n_simulations: 1000,
            uncertainty_levels: vec![0.5, 0.75, 1.0, 1.25, 1.5],
            correlation_levels: vec![0.0, 0.5, 1.0, 1.5, 2.0],
            national_swing_levels_pp: vec![-3.0, -2.0, -1.0, 0.0, 1.0, 2.0, 3.0],
        }
    }
}

impl SensitivityConfig {
    fn validate(&self) -> Result<()> {
        if self.enabled && self.n_simulations == 0 {
            return Err(Error::invalid_config(
                "simulation.sensitivity.n_simulations must be > 0",
            ));
        }
        let multipliers = self.uncertainty_levels.iter().chain(&self.correlation_levels);
        if let Some(bad) = multipliers.copied().find(|l| !(l.is_finite() && *l >= 0.0)) {
            return Err(Error::invalid_config(format!(
                "sensitivity multipliers must be >= 0, got {bad}"
            )));
        }
        if let Some(bad) = self
            .national_swing_levels_pp
            .iter()
            .copied()
            .find(|l| !(l.is_finite() && l.abs() <= 100.0))
        {
            return Err(Error::invalid_config(format!(
                "sensitivity swing must be within +/-100 pp, got {bad}"
            )));
        }
        Ok(())
    }
}

/// On-disk layout.
///
/// ```text
/// data_dir/
/// ├── features/   feature store + backups/
/// ├── models/     versioned model snapshots
/// └── reports/    forecast reports
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,

    /// Feature backups younger than this are never deleted.
    /// Default: 30
    pub backup_retention_days: u32,

    /// Model versions kept by `prune`.
    /// Default: 10
    pub keep_model_versions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backup_retention_days: 30,
            keep_model_versions: 10,
        }
    }
}

impl StorageConfig {
    pub fn feature_dir(&self) -> PathBuf {
        self.data_dir.join("features")
    }

    pub fn model_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }
}
