#![deny(unreachable_pub)]

mod errors;
pub mod forecast;

pub use errors::{Error, Result, SignalError, StorageError};
pub use forecast::{
    Alliance, ConstituencyBaseline, ConstituencyFeatureVector, CycleOutcome, FeatureStore,
    ForecastConfig, ForecastCycle, ForecastReport, ModelCalibrator, ModelRegistry, ModelSnapshot,
    MonteCarloSimulator, PerAlliance, ReportStore, SignalBatch, SignalRecord,
};
