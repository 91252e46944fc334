//! Election seat forecasting pipeline.
//!
//! One cycle flows through these stages:
//!
//! ```text
//! SignalRecord batch ──► SignalAggregator ──► CycleSignals
//!                                                 │
//! FeatureStore (latest) ──► FeatureUpdater (EMA, clip, regional fallback)
//!                                                 │
//!                  ModelCalibrator ──► calibrated P(A beats B) per seat
//!                                                 │
//!                  MonteCarloSimulator ──► SimulationResult
//!                                                 │
//!                  ReportBuilder ──► ForecastReport ──► ReportStore
//! ```
//!
//! [`ForecastCycle`] runs the stages in order and commits the feature store
//! only once every stage has succeeded.

pub mod config;
pub mod cycle;
pub mod features;
pub mod infra;
pub mod model;
pub mod report;
pub mod signals;
pub mod simulation;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::{
    AggregatorConfig, AllianceNames, Bound, CalibratorConfig, FeatureBounds, ForecastConfig,
    ScenarioBands, SensitivityConfig, SimulationConfig, StorageConfig, UpdaterConfig,
};
pub use cycle::{CycleOutcome, ForecastCycle};
pub use features::{
    BaselineShares, ConstituencyBaseline, ConstituencyFeatureVector, FeatureStore,
    FeatureUpdater,
};
pub use model::{
    LabeledOutcome, LabeledSample, ModelCalibrator, ModelRegistry, ModelSnapshot,
};
pub use report::{ForecastReport, ReportBuilder, ReportStore};
pub use signals::{SignalAggregator, SignalBatch, SignalRecord, SignalScope};
pub use simulation::{MonteCarloSimulator, SeatClass, SeatInput, SimulationResult};
pub use types::{Alliance, PerAlliance};
