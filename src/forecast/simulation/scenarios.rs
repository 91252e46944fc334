//! Outcome scenarios and sensitivity analysis over simulated seat tallies.

use serde::{Deserialize, Serialize};

use super::monte_carlo::SeatTally;
use crate::forecast::config::ScenarioBands;
use crate::forecast::types::{Alliance, PerAlliance};

/// Seat band a scenario is defined by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioBand {
    Landslide,
    Comfortable,
    Majority,
    /// No bloc reaches the majority line.
    #[default]
    Hung,
}

impl std::fmt::Display for ScenarioBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioBand::Landslide => write!(f, "landslide"),
            ScenarioBand::Comfortable => write!(f, "comfortable majority"),
            ScenarioBand::Majority => write!(f, "majority"),
            ScenarioBand::Hung => write!(f, "hung assembly"),
        }
    }
}

/// Share of simulated elections that land in one scenario.
///
/// Bands nest: a landslide is also a comfortable majority and a majority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioProbability {
    pub band: ScenarioBand,
    /// `None` for [`ScenarioBand::Hung`].
    pub alliance: Option<Alliance>,
    /// Seats the alliance needs to be in the band.
    pub min_seats: Option<u32>,
    pub probability: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    /// A landslide, comfortable, majority, then hung, then B majority,
    /// comfortable, landslide.
    pub scenarios: Vec<ScenarioProbability>,
    /// Highest probability, earliest in `scenarios` on ties.
    pub most_likely: ScenarioProbability,
}

impl ScenarioSummary {
    pub fn from_tallies(
        tallies: &[SeatTally],
        total_seats: u32,
        majority_seats: u32,
        bands: &ScenarioBands,
    ) -> Self {
        let nf = tallies.len().max(1) as f64;
        let (comfortable, landslide) = bands.seats(total_seats, majority_seats);
        let side = |alliance: Alliance, band: ScenarioBand, min_seats: u32| {
            let hits = tallies.iter().filter(|t| *t.get(alliance) >= min_seats).count();
            ScenarioProbability {
                band,
                alliance: Some(alliance),
                min_seats: Some(min_seats),
                probability: hits as f64 / nf,
            }
        };
        let hung = tallies
            .iter()
            .filter(|t| Alliance::ALL.iter().all(|a| *t.get(*a) < majority_seats))
            .count() as f64
            / nf;

        let mut scenarios = vec![
            side(Alliance::A, ScenarioBand::Landslide, landslide),
            side(Alliance::A, ScenarioBand::Comfortable, comfortable),
            side(Alliance::A, ScenarioBand::Majority, majority_seats),
            ScenarioProbability {
                band: ScenarioBand::Hung,
                alliance: None,
                min_seats: None,
                probability: hung,
            },
        ];
        scenarios.extend([
            side(Alliance::B, ScenarioBand::Majority, majority_seats),
            side(Alliance::B, ScenarioBand::Comfortable, comfortable),
            side(Alliance::B, ScenarioBand::Landslide, landslide),
        ]);

        let most_likely = scenarios
            .iter()
            .copied()
            .reduce(|best, s| if s.probability > best.probability { s } else { best })
            .unwrap_or_default();
        Self {
            scenarios,
            most_likely,
        }
    }

    pub fn get(&self, alliance: Option<Alliance>, band: ScenarioBand) -> Option<&ScenarioProbability> {
        self.scenarios
            .iter()
            .find(|s| s.alliance == alliance && s.band == band)
    }
}

/// Assumption varied by a sensitivity run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityFactor {
    /// Both shock std devs scaled by the level.
    Uncertainty,
    /// Regional shock std dev scaled by the level.
    Correlation,
    /// Every seat's P(A) shifted by the level in percentage points.
    NationalSwing,
}

/// Headline numbers of one perturbed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityPoint {
    pub factor: SensitivityFactor,
    pub level: f64,
    pub mean_seats: PerAlliance<f64>,
    pub majority_probability: PerAlliance<f64>,
}

/// Every perturbed run shares the base seed, so differences between levels
/// come from the assumption alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityAnalysis {
    pub seed: u64,
    pub n_simulations: usize,
    pub points: Vec<SensitivityPoint>,
}

impl SensitivityAnalysis {
    pub fn factor(&self, factor: SensitivityFactor) -> impl Iterator<Item = &SensitivityPoint> + '_ {
        self.points.iter().filter(move |p| p.factor == factor)
    }
}
