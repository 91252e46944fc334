//! Monte Carlo seat simulation, seat classification and scenario analysis.

pub mod classification;
pub mod monte_carlo;
pub mod scenarios;
pub mod stats;

pub use classification::{rate, SeatClass, SeatRating, LEAN_THRESHOLD, SAFE_THRESHOLD};
pub use monte_carlo::{
    others_probability, substream_seed, ConvergenceDiagnostics, MarginalSeat, MonteCarloSimulator,
    SeatInput, SeatOutcome, SeatTally, SimulationResult,
};
pub use scenarios::{
    ScenarioBand, ScenarioProbability, ScenarioSummary, SensitivityAnalysis, SensitivityFactor,
    SensitivityPoint,
};
pub use stats::{percentile, Percentiles, SeatDistribution};
