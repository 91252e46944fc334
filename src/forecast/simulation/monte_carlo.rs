//! Monte Carlo seat simulator.
//!
//! # Model
//!
//! For each simulated election:
//! 1. Draw one national shock ~ N(0, national_sd) and one shock per region
//!    ~ N(0, regional_sd), regions in sorted order
//! 2. Per seat: p = clip(p_A + national + regional[region], floor, ceiling)
//! 3. Draw u ~ U(0,1): u < p_others gives Others the seat, otherwise a second
//!    draw against p decides A vs B
//! 4. Sum seats per alliance
//!
//! p_others is fixed per seat from the baseline shares (see
//! [`others_probability`]) and is never shocked.
//!
//! Simulation `i` draws from its own `StdRng` seeded by
//! [`substream_seed`]`(seed, i)`, so results are bit-identical for a given seed
//! no matter how many workers run them.
//!
//! [`MonteCarloSimulator::sensitivity`] re-runs the model with one assumption
//! varied at a time, reusing the same seed.

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::classification::{rate, SeatClass, SeatRating};
use super::scenarios::{ScenarioSummary, SensitivityAnalysis, SensitivityFactor, SensitivityPoint};
use super::stats::SeatDistribution;
use crate::forecast::config::SimulationConfig;
use crate::forecast::features::BaselineShares;
use crate::forecast::types::{Alliance, PerAlliance};
use crate::{Error, Result};

/// Simulated seats per alliance in one election.
pub type SeatTally = PerAlliance<u32>;

/// Ceiling on the Others win probability of a single seat.
const MAX_OTHERS_PROBABILITY: f64 = 0.98;

/// Probability that Others take the seat, from baseline shares.
///
/// 0.5 when Others tie the leading alliance, falling linearly to 0 once they
/// trail by `contention_margin_pp`.
pub fn others_probability(shares: &BaselineShares, contention_margin_pp: f64) -> f64 {
    let leader = shares.a.max(shares.b);
    let p = 0.5 + (shares.others - leader) / (2.0 * contention_margin_pp);
    if p.is_finite() {
        p.clamp(0.0, MAX_OTHERS_PROBABILITY)
    } else {
        0.0
    }
}

/// Per-simulation RNG seed (SplitMix64 over seed and index).
pub fn substream_seed(master_seed: u64, index: u64) -> u64 {
    splitmix64(master_seed ^ splitmix64(index))
}

#[inline]
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// One seat as handed to the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatInput {
    pub constituency_id: String,
    pub region: String,
    /// Unshocked calibrated P(A beats B).
    pub probability_a: f64,
    /// Fixed P(Others win).
    pub others_probability: f64,
}

impl SeatInput {
    pub fn new(
        constituency_id: impl Into<String>,
        region: impl Into<String>,
        probability_a: f64,
        others_probability: f64,
    ) -> Self {
        Self {
            constituency_id: constituency_id.into(),
            region: region.into(),
            probability_a,
            others_probability,
        }
    }

    /// Seat whose Others probability comes from baseline shares.
    pub fn from_baseline(
        constituency_id: impl Into<String>,
        region: impl Into<String>,
        probability_a: f64,
        baseline: &BaselineShares,
        contention_margin_pp: f64,
    ) -> Self {
        Self::new(
            constituency_id,
            region,
            probability_a,
            others_probability(baseline, contention_margin_pp),
        )
    }
}

/// Per-seat view of the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatOutcome {
    pub constituency_id: String,
    pub region: String,
    pub probability_a: f64,
    pub others_probability: f64,
    pub rating: SeatRating,
    /// Share of simulations each bloc won this seat.
    pub win_rates: PerAlliance<f64>,
}

/// A Lean or Toss-up seat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalSeat {
    pub constituency_id: String,
    pub region: String,
    pub probability_a: f64,
    pub rating: SeatRating,
}

/// Monte Carlo standard errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceDiagnostics {
    /// sqrt(p(1-p)/N) for each majority probability.
    pub majority_standard_error: PerAlliance<f64>,
    /// sd / sqrt(N) for each mean seat count.
    pub mean_seats_standard_error: PerAlliance<f64>,
    pub tolerance: f64,
    pub converged: bool,
}

/// Everything produced by one simulator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub n_simulations: usize,
    pub seed: u64,
    pub total_seats: u32,
    pub majority_seats: u32,
    pub strong_majority_seats: u32,
    /// Seat totals of every simulated election, in simulation order.
    pub tallies: Vec<SeatTally>,
    pub seats: Vec<SeatOutcome>,
    pub distributions: PerAlliance<SeatDistribution>,
    pub majority_probability: PerAlliance<f64>,
    pub strong_majority_probability: PerAlliance<f64>,
    /// No bloc reaches a majority.
    pub hung_probability: f64,
    /// Sorted by closeness to 0.5, then id.
    pub marginal_seats: Vec<MarginalSeat>,
    pub scenarios: ScenarioSummary,
    pub diagnostics: ConvergenceDiagnostics,
}

impl SimulationResult {
    pub fn seat_class_counts(&self) -> BTreeMap<SeatClass, usize> {
        let mut counts = BTreeMap::new();
        for seat in &self.seats {
            *counts.entry(seat.rating.class).or_insert(0) += 1;
        }
        counts
    }
}

/// Runs seeded, parallel seat simulations.
#[derive(Debug)]
pub struct MonteCarloSimulator {
    config: SimulationConfig,
    pool: Option<rayon::ThreadPool>,
}

impl MonteCarloSimulator {
    /// Build the simulator; a dedicated pool is created when `workers` is set.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let pool = match config.workers {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("seat-sim-{i}"))
                    .build()
                    .map_err(|e| Error::WorkerPool(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn run(&self, seats: &[SeatInput]) -> Result<SimulationResult> {
        let result = self.run_with(&self.config, seats)?;

        info!(
            n_simulations = result.n_simulations,
            seats = result.total_seats,
            mean_a = result.distributions.a.mean,
            mean_b = result.distributions.b.mean,
            p_majority_a = result.majority_probability.a,
            p_majority_b = result.majority_probability.b,
            p_hung = result.hung_probability,
            marginal = result.marginal_seats.len(),
            most_likely = %result.scenarios.most_likely.band,
            "Simulation complete"
        );
        if !result.diagnostics.converged {
            warn!(
                se_a = result.diagnostics.majority_standard_error.a,
                se_b = result.diagnostics.majority_standard_error.b,
                tolerance = result.diagnostics.tolerance,
                "Majority probabilities not converged, consider more simulations"
            );
        }
        Ok(result)
    }

    /// Re-run the simulation with one assumption varied per run.
    ///
    /// Levels come from `config.sensitivity`; every run uses the base seed
    /// and `sensitivity.n_simulations` draws.
    pub fn sensitivity(&self, seats: &[SeatInput]) -> Result<SensitivityAnalysis> {
        let levels = &self.config.sensitivity;
        let base = SimulationConfig {
            n_simulations: levels.n_simulations,
            ..self.config.clone()
        };
        let mut points = Vec::new();

        for &level in &levels.uncertainty_levels {
            let cfg = SimulationConfig {
                national_shock_sd: base.national_shock_sd * level,
                regional_shock_sd: base.regional_shock_sd * level,
                ..base.clone()
            };
            points.push(self.sensitivity_point(&cfg, seats, SensitivityFactor::Uncertainty, level)?);
        }
        for &level in &levels.correlation_levels {
            let cfg = SimulationConfig {
                regional_shock_sd: base.regional_shock_sd * level,
                ..base.clone()
            };
            points.push(self.sensitivity_point(&cfg, seats, SensitivityFactor::Correlation, level)?);
        }
        for &swing_pp in &levels.national_swing_levels_pp {
            let shifted: Vec<SeatInput> = seats
                .iter()
                .map(|s| SeatInput {
                    probability_a: (s.probability_a + swing_pp / 100.0).clamp(0.0, 1.0),
                    ..s.clone()
                })
                .collect();
            points.push(self.sensitivity_point(
                &base,
                &shifted,
                SensitivityFactor::NationalSwing,
                swing_pp,
            )?);
        }

        info!(
            runs = points.len(),
            n_simulations = base.n_simulations,
            "Sensitivity analysis complete"
        );
        Ok(SensitivityAnalysis {
            seed: base.seed,
            n_simulations: base.n_simulations,
            points,
        })
    }

    fn sensitivity_point(
        &self,
        cfg: &SimulationConfig,
        seats: &[SeatInput],
        factor: SensitivityFactor,
        level: f64,
    ) -> Result<SensitivityPoint> {
        let result = self.run_with(cfg, seats)?;
        debug!(
            ?factor,
            level,
            mean_a = result.distributions.a.mean,
            p_majority_a = result.majority_probability.a,
            "Sensitivity run"
        );
        Ok(SensitivityPoint {
            factor,
            level,
            mean_seats: result.distributions.map(|d| d.mean),
            majority_probability: result.majority_probability,
        })
    }

    fn run_with(&self, cfg: &SimulationConfig, seats: &[SeatInput]) -> Result<SimulationResult> {
        validate_inputs(seats)?;
        let total_seats = u32::try_from(seats.len())
            .map_err(|_| Error::invalid_input("too many seats"))?;
        let (majority, strong) = cfg.thresholds(total_seats)?;

        // Region index in sorted order so shocks line up across runs
        let regions: Vec<&str> = seats
            .iter()
            .map(|s| s.region.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let region_of: Vec<usize> = seats
            .iter()
            .map(|s| regions.binary_search(&s.region.as_str()).unwrap_or(0))
            .collect();

        let n = cfg.n_simulations;
        let draw = |i: usize| simulate_one(cfg, i as u64, seats, &region_of, regions.len());
        let outcomes: Vec<(SeatTally, Vec<Alliance>)> = match &self.pool {
            Some(pool) => pool.install(|| (0..n).into_par_iter().map(draw).collect()),
            None => (0..n).into_par_iter().map(draw).collect(),
        };

        let mut seat_wins = vec![PerAlliance::<u32>::default(); seats.len()];
        let mut tallies = Vec::with_capacity(n);
        for (tally, winners) in outcomes {
            for (counts, winner) in seat_wins.iter_mut().zip(winners) {
                *counts.get_mut(winner) += 1;
            }
            tallies.push(tally);
        }

        Ok(summarize(cfg, seats, tallies, &seat_wins, total_seats, majority, strong))
    }
}

fn simulate_one(
    cfg: &SimulationConfig,
    index: u64,
    seats: &[SeatInput],
    region_of: &[usize],
    n_regions: usize,
) -> (SeatTally, Vec<Alliance>) {
    let mut rng = StdRng::seed_from_u64(substream_seed(cfg.seed, index));

    let national: f64 = cfg.national_shock_sd * rng.sample::<f64, _>(StandardNormal);
    let regional: Vec<f64> = (0..n_regions)
        .map(|_| cfg.regional_shock_sd * rng.sample::<f64, _>(StandardNormal))
        .collect();

    let mut tally = SeatTally::default();
    let mut winners = Vec::with_capacity(seats.len());
    for (seat, &r) in seats.iter().zip(region_of) {
        let shock = national + regional.get(r).copied().unwrap_or(0.0);
        let p = (seat.probability_a + shock).clamp(cfg.probability_floor, cfg.probability_ceiling);

        let winner = if rng.gen::<f64>() < seat.others_probability {
            Alliance::Others
        } else if rng.gen::<f64>() < p {
            Alliance::A
        } else {
            Alliance::B
        };
        *tally.get_mut(winner) += 1;
        winners.push(winner);
    }
    (tally, winners)
}

fn summarize(
    cfg: &SimulationConfig,
    seats: &[SeatInput],
    tallies: Vec<SeatTally>,
    seat_wins: &[PerAlliance<u32>],
    total_seats: u32,
    majority: u32,
    strong: u32,
) -> SimulationResult {
    let n = tallies.len();
    let nf = n.max(1) as f64;
    let scenarios =
        ScenarioSummary::from_tallies(&tallies, total_seats, majority, &cfg.scenario_bands);

    let counts = PerAlliance::from_fn(|a| tallies.iter().map(|t| *t.get(a)).collect::<Vec<_>>());
    let distributions = counts.map(|c| SeatDistribution::from_counts(c));
    let share_at_least = |threshold: u32| {
        counts.map(|c| c.iter().filter(|s| **s >= threshold).count() as f64 / nf)
    };
    let majority_probability = share_at_least(majority);
    let strong_majority_probability = share_at_least(strong);
    let hung = tallies
        .iter()
        .filter(|t| Alliance::ALL.iter().all(|a| *t.get(*a) < majority))
        .count() as f64
        / nf;

    let seat_outcomes: Vec<SeatOutcome> = seats
        .iter()
        .zip(seat_wins)
        .map(|(seat, wins)| SeatOutcome {
            constituency_id: seat.constituency_id.clone(),
            region: seat.region.clone(),
            probability_a: seat.probability_a,
            others_probability: seat.others_probability,
            rating: rate(seat.probability_a),
            win_rates: wins.map(|w| f64::from(*w) / nf),
        })
        .collect();

    let mut marginal_seats: Vec<MarginalSeat> = seat_outcomes
        .iter()
        .filter(|s| s.rating.class.is_marginal())
        .map(|s| MarginalSeat {
            constituency_id: s.constituency_id.clone(),
            region: s.region.clone(),
            probability_a: s.probability_a,
            rating: s.rating,
        })
        .collect();
    marginal_seats.sort_by(|x, y| {
        (x.probability_a - 0.5)
            .abs()
            .total_cmp(&(y.probability_a - 0.5).abs())
            .then_with(|| x.constituency_id.cmp(&y.constituency_id))
    });

    let majority_standard_error =
        majority_probability.map(|p| (p * (1.0 - p) / nf).sqrt());
    let mean_seats_standard_error = distributions.map(|d| d.std_dev / nf.sqrt());
    let tolerance = cfg.convergence_tolerance;
    let converged = Alliance::ALL
        .iter()
        .all(|a| *majority_standard_error.get(*a) <= tolerance);
    debug!(?majority_standard_error, converged, "Convergence diagnostics");

    SimulationResult {
        n_simulations: n,
        seed: cfg.seed,
        total_seats,
        majority_seats: majority,
        strong_majority_seats: strong,
        tallies,
        seats: seat_outcomes,
        distributions,
        majority_probability,
        strong_majority_probability,
        hung_probability: hung,
        marginal_seats,
        scenarios,
        diagnostics: ConvergenceDiagnostics {
            majority_standard_error,
            mean_seats_standard_error,
            tolerance,
            converged,
        },
    }
}

fn validate_inputs(seats: &[SeatInput]) -> Result<()> {
    if seats.is_empty() {
        return Err(Error::invalid_input("no seats to simulate"));
    }
    let mut seen = HashSet::new();
    for seat in seats {
        if !seen.insert(seat.constituency_id.as_str()) {
            return Err(Error::DuplicateConstituency(seat.constituency_id.clone()));
        }
        for (name, p) in [
            ("probability_a", seat.probability_a),
            ("others_probability", seat.others_probability),
        ] {
            if !(p.is_finite() && (0.0..=1.0).contains(&p)) {
                return Err(Error::invalid_input(format!(
                    "{}: {name} must be in [0, 1], got {p}",
                    seat.constituency_id
                )));
            }
        }
    }
    Ok(())
}
