//! Forecast report: the canonical output of a cycle.
//!
//! [`ReportBuilder`] turns a [`SimulationResult`] into a [`ForecastReport`];
//! [`ReportStore`] persists it. `latest.json` always holds the last report
//! of a cycle that completed, so a failed cycle leaves the previous forecast
//! in place.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::config::AllianceNames;
use super::infra::fs::{ensure_dir, write_new, StagedWrite};
use super::simulation::{
    Percentiles, ScenarioBand, ScenarioProbability, SeatClass, SensitivityAnalysis,
    SensitivityFactor, SimulationResult,
};
use super::types::{Alliance, PerAlliance};
use crate::{Error, Result};

/// Provenance of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: DateTime<Utc>,
    pub model_version: u64,
    pub model_version_id: String,
    pub store_version: u64,
    pub seed: u64,
    pub n_simulations: usize,
    pub total_seats: u32,
    pub majority_seats: u32,
    pub strong_majority_seats: u32,
    pub converged: bool,
}

/// Seat projection for one bloc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllianceSeatSummary {
    pub alliance: Alliance,
    pub name: String,
    pub mean_seats: f64,
    pub median_seats: f64,
    pub std_dev: f64,
    pub percentiles: Percentiles,
    pub majority_probability: f64,
    pub strong_majority_probability: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatClassCounts {
    pub safe: usize,
    pub lean: usize,
    pub toss_up: usize,
}

/// Expected seats per bloc within one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalSummary {
    pub region: String,
    pub seats: usize,
    pub expected_seats: PerAlliance<f64>,
    pub marginal_seats: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalSeatEntry {
    pub constituency_id: String,
    pub region: String,
    pub probability_a: f64,
    pub favored: Alliance,
    pub favored_name: String,
    pub favored_probability: f64,
    pub label: SeatClass,
}

/// One outcome scenario with its display label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioEntry {
    pub band: ScenarioBand,
    pub alliance: Option<Alliance>,
    /// `Alliance A landslide`, `hung assembly`
    pub label: String,
    pub min_seats: Option<u32>,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    pub metadata: ReportMetadata,
    pub alliances: Vec<AllianceSeatSummary>,
    pub hung_probability: f64,
    pub seat_classes: SeatClassCounts,
    pub regions: Vec<RegionalSummary>,
    pub marginal_seats: Vec<MarginalSeatEntry>,
    /// Constituencies that received no signal this cycle.
    #[serde(default)]
    pub data_gaps: Vec<String>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioEntry>,
    #[serde(default)]
    pub most_likely_scenario: Option<ScenarioEntry>,
    /// Absent when sensitivity analysis is disabled.
    #[serde(default)]
    pub sensitivity: Option<SensitivityAnalysis>,
}

impl ForecastReport {
    pub fn alliance(&self, alliance: Alliance) -> Option<&AllianceSeatSummary> {
        self.alliances.iter().find(|s| s.alliance == alliance)
    }

    /// Human-readable summary for logs and the CLI.
    pub fn summary(&self) -> String {
        let m = &self.metadata;
        let mut out = format!(
            "Forecast {} | model {} | store v{} | {} sims (seed {}){}\n",
            m.generated_at.format("%Y-%m-%d %H:%M UTC"),
            m.model_version_id,
            m.store_version,
            m.n_simulations,
            m.seed,
            if m.converged { "" } else { " [not converged]" },
        );
        let _ = writeln!(
            out,
            "{} seats, majority {}, strong majority {}",
            m.total_seats, m.majority_seats, m.strong_majority_seats
        );
        for s in &self.alliances {
            let _ = writeln!(
                out,
                "  {:<12} mean {:>6.1}  90% [{:.0}, {:.0}]  P(maj) {:>5.1}%  P(strong) {:>5.1}%",
                s.name,
                s.mean_seats,
                s.percentiles.p5,
                s.percentiles.p95,
                s.majority_probability * 100.0,
                s.strong_majority_probability * 100.0,
            );
        }
        let c = &self.seat_classes;
        let _ = writeln!(
            out,
            "  Hung {:.1}% | Safe {} / Lean {} / Toss-up {}",
            self.hung_probability * 100.0,
            c.safe,
            c.lean,
            c.toss_up
        );
        if let Some(scenario) = &self.most_likely_scenario {
            let _ = writeln!(
                out,
                "  Most likely: {} ({:.1}%)",
                scenario.label,
                scenario.probability * 100.0
            );
        }
        if let Some(sensitivity) = &self.sensitivity {
            for (factor, title) in [
                (SensitivityFactor::Uncertainty, "uncertainty x"),
                (SensitivityFactor::Correlation, "correlation x"),
                (SensitivityFactor::NationalSwing, "swing pp"),
            ] {
                let cells: Vec<String> = sensitivity
                    .factor(factor)
                    .map(|p| {
                        format!(
                            "{:+}: {:.1} ({:.0}%)",
                            p.level,
                            p.mean_seats.a,
                            p.majority_probability.a * 100.0
                        )
                    })
                    .collect();
                if !cells.is_empty() {
                    let _ = writeln!(out, "  A by {title}: {}", cells.join(" | "));
                }
            }
        }
        for seat in self.marginal_seats.iter().take(10) {
            let _ = writeln!(
                out,
                "    {} ({}) {} {} {:.0}%",
                seat.constituency_id,
                seat.region,
                seat.label,
                seat.favored_name,
                seat.favored_probability * 100.0
            );
        }
        out
    }
}

/// Inputs to the report that do not come from the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportContext {
    pub generated_at: DateTime<Utc>,
    pub model_version: u64,
    pub model_version_id: String,
    pub store_version: u64,
    pub data_gaps: Vec<String>,
    pub sensitivity: Option<SensitivityAnalysis>,
}

#[derive(Debug, Clone)]
pub struct ReportBuilder {
    names: AllianceNames,
}

impl ReportBuilder {
    pub fn new(names: AllianceNames) -> Self {
        Self { names }
    }

    fn name(&self, alliance: Alliance) -> &str {
        match alliance {
            Alliance::A => &self.names.a,
            Alliance::B => &self.names.b,
            Alliance::Others => &self.names.others,
        }
    }

    fn scenario_entry(&self, scenario: &ScenarioProbability) -> ScenarioEntry {
        let label = match scenario.alliance {
            Some(alliance) => format!("{} {}", self.name(alliance), scenario.band),
            None => scenario.band.to_string(),
        };
        ScenarioEntry {
            band: scenario.band,
            alliance: scenario.alliance,
            label,
            min_seats: scenario.min_seats,
            probability: scenario.probability,
        }
    }

    pub fn build(&self, result: &SimulationResult, context: ReportContext) -> ForecastReport {
        let alliances = Alliance::ALL
            .iter()
            .map(|&alliance| {
                let dist = result.distributions.get(alliance);
                AllianceSeatSummary {
                    alliance,
                    name: self.name(alliance).to_string(),
                    mean_seats: dist.mean,
                    median_seats: dist.median,
                    std_dev: dist.std_dev,
                    percentiles: dist.percentiles,
                    majority_probability: *result.majority_probability.get(alliance),
                    strong_majority_probability: *result.strong_majority_probability.get(alliance),
                }
            })
            .collect();

        let mut seat_classes = SeatClassCounts::default();
        let mut regions: BTreeMap<&str, RegionalSummary> = BTreeMap::new();
        for seat in &result.seats {
            match seat.rating.class {
                SeatClass::Safe => seat_classes.safe += 1,
                SeatClass::Lean => seat_classes.lean += 1,
                SeatClass::TossUp => seat_classes.toss_up += 1,
            }
            let entry = regions
                .entry(seat.region.as_str())
                .or_insert_with(|| RegionalSummary {
                    region: seat.region.clone(),
                    seats: 0,
                    expected_seats: PerAlliance::default(),
                    marginal_seats: 0,
                });
            entry.seats += 1;
            for alliance in Alliance::ALL {
                *entry.expected_seats.get_mut(alliance) += seat.win_rates.get(alliance);
            }
            if seat.rating.class.is_marginal() {
                entry.marginal_seats += 1;
            }
        }

        let marginal_seats = result
            .marginal_seats
            .iter()
            .map(|seat| MarginalSeatEntry {
                constituency_id: seat.constituency_id.clone(),
                region: seat.region.clone(),
                probability_a: seat.probability_a,
                favored: seat.rating.favored,
                favored_name: self.name(seat.rating.favored).to_string(),
                favored_probability: seat.rating.favored_probability,
                label: seat.rating.class,
            })
            .collect();

        ForecastReport {
            metadata: ReportMetadata {
                generated_at: context.generated_at,
                model_version: context.model_version,
                model_version_id: context.model_version_id,
                store_version: context.store_version,
                seed: result.seed,
                n_simulations: result.n_simulations,
                total_seats: result.total_seats,
                majority_seats: result.majority_seats,
                strong_majority_seats: result.strong_majority_seats,
                converged: result.diagnostics.converged,
            },
            alliances,
            hung_probability: result.hung_probability,
            seat_classes,
            regions: regions.into_values().collect(),
            marginal_seats,
            data_gaps: context.data_gaps,
            scenarios: result
                .scenarios
                .scenarios
                .iter()
                .map(|s| self.scenario_entry(s))
                .collect(),
            most_likely_scenario: Some(self.scenario_entry(&result.scenarios.most_likely)),
            sensitivity: context.sensitivity,
        }
    }
}

const LATEST_REPORT: &str = "latest.json";

/// Published reports on disk.
#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a timestamped copy, then promote it to `latest.json`.
    pub fn publish(&self, report: &ForecastReport) -> Result<PathBuf> {
        self.stage(report)?.promote()
    }

    /// Do every write that can fail ahead of time: the archived copy and a
    /// staged `latest.json`. Readers still see the previous report until
    /// [`StagedReport::promote`].
    pub fn stage(&self, report: &ForecastReport) -> Result<StagedReport> {
        let archived = self.dir.join(format!(
            "report_{}_v{:06}.json",
            report.metadata.generated_at.format("%Y%m%d_%H%M%S"),
            report.metadata.store_version
        ));
        let json = serde_json::to_string_pretty(report).map_err(|e| Error::json(&archived, e))?;
        write_new(&archived, json.as_bytes())?;
        let latest = match StagedWrite::stage(&self.dir.join(LATEST_REPORT), json.as_bytes()) {
            Ok(latest) => latest,
            Err(e) => {
                remove_archive(&archived);
                return Err(e);
            }
        };
        Ok(StagedReport {
            archived,
            latest,
            store_version: report.metadata.store_version,
            model_version_id: report.metadata.model_version_id.clone(),
        })
    }

    /// Last-known-good report, if any cycle ever completed.
    pub fn load_latest(&self) -> Result<Option<ForecastReport>> {
        let path = self.dir.join(LATEST_REPORT);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| Error::json(&path, e))
    }
}

/// A report written to disk but not yet visible as `latest.json`.
#[derive(Debug)]
pub struct StagedReport {
    archived: PathBuf,
    latest: StagedWrite,
    store_version: u64,
    model_version_id: String,
}

impl StagedReport {
    pub fn archived_path(&self) -> &Path {
        &self.archived
    }

    /// Make the report the last-known-good one.
    pub fn promote(self) -> Result<PathBuf> {
        self.latest.promote()?;
        info!(
            store_version = self.store_version,
            model = %self.model_version_id,
            "Forecast report published to {}",
            self.archived.display()
        );
        Ok(self.archived)
    }

    /// Withdraw the report: the archived copy and the staged file are removed.
    pub fn discard(self) {
        remove_archive(&self.archived);
    }
}

fn remove_archive(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove staged report archive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::config::{SensitivityConfig, SimulationConfig};
    use crate::forecast::simulation::{MonteCarloSimulator, SeatInput};
    use chrono::TimeZone;

    fn result() -> SimulationResult {
        let seats = vec![
            SeatInput::new("AC_1", "North", 0.9, 0.0),
            SeatInput::new("AC_2", "North", 0.7, 0.0),
            SeatInput::new("AC_3", "South", 0.3, 0.0),
            SeatInput::new("AC_4", "South", 0.5, 0.2),
            SeatInput::new("AC_5", "East", 0.1, 0.0),
        ];
        MonteCarloSimulator::new(SimulationConfig {
            n_simulations: 500,
            ..Default::default()
        })
        .unwrap()
        .run(&seats)
        .unwrap()
    }

    fn context() -> ReportContext {
        ReportContext {
            generated_at: Utc.with_ymd_and_hms(2025, 10, 15, 6, 0, 0).unwrap(),
            model_version: 3,
            model_version_id: "v000003_20251001_000000".to_string(),
            store_version: 12,
            data_gaps: vec!["AC_5".to_string()],
            sensitivity: None,
        }
    }

    #[test]
    fn test_build_report() {
        let result = result();
        let report = ReportBuilder::new(AllianceNames::default()).build(&result, context());

        assert_eq!(report.alliances.len(), 3);
        let a = report.alliance(Alliance::A).unwrap();
        assert_eq!(a.name, "Alliance A");
        assert_eq!(a.majority_probability, result.majority_probability.a);

        assert_eq!(
            report.seat_classes,
            SeatClassCounts {
                safe: 2,
                lean: 2,
                toss_up: 1
            }
        );
        let regions: Vec<_> = report.regions.iter().map(|r| r.region.as_str()).collect();
        assert_eq!(regions, vec!["East", "North", "South"]);
        let north = &report.regions[1];
        assert_eq!(north.seats, 2);
        let expected: f64 = north.expected_seats.a + north.expected_seats.b + north.expected_seats.others;
        assert!((expected - 2.0).abs() < 1e-9);

        assert_eq!(report.marginal_seats.len(), 3);
        assert_eq!(report.marginal_seats[0].constituency_id, "AC_4");
        assert_eq!(report.marginal_seats[0].label, SeatClass::TossUp);
        let b_lean = report
            .marginal_seats
            .iter()
            .find(|m| m.constituency_id == "AC_3")
            .unwrap();
        assert_eq!(b_lean.favored_name, "Alliance B");
        assert_eq!(report.metadata.store_version, 12);
        assert!(report.summary().contains("Alliance A"));

        assert_eq!(report.scenarios.len(), 7);
        assert_eq!(report.scenarios[0].label, "Alliance A landslide");
        assert_eq!(report.scenarios[3].label, "hung assembly");
        assert_eq!(report.scenarios[6].alliance, Some(Alliance::B));
        let most_likely = report.most_likely_scenario.as_ref().unwrap();
        assert_eq!(most_likely.probability, result.scenarios.most_likely.probability);
        assert!(report.summary().contains("Most likely:"));
        assert!(report.sensitivity.is_none());
    }

    #[test]
    fn test_report_carries_sensitivity() {
        let sim = MonteCarloSimulator::new(SimulationConfig {
            n_simulations: 200,
            sensitivity: SensitivityConfig {
                n_simulations: 100,
                uncertainty_levels: vec![0.5, 1.0],
                correlation_levels: Vec::new(),
                national_swing_levels_pp: vec![-2.0, 2.0],
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let seats = vec![
            SeatInput::new("AC_1", "North", 0.6, 0.0),
            SeatInput::new("AC_2", "South", 0.4, 0.0),
            SeatInput::new("AC_3", "South", 0.5, 0.0),
        ];
        let result = sim.run(&seats).unwrap();
        let mut ctx = context();
        ctx.sensitivity = Some(sim.sensitivity(&seats).unwrap());
        let report = ReportBuilder::new(AllianceNames::default()).build(&result, ctx);

        let sensitivity = report.sensitivity.as_ref().unwrap();
        assert_eq!(sensitivity.points.len(), 4);
        let summary = report.summary();
        assert!(summary.contains("A by uncertainty x"));
        assert!(summary.contains("A by swing pp"));
        assert!(!summary.contains("A by correlation x"));

        let json = serde_json::to_string(&report).unwrap();
        let restored: ForecastReport = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.sensitivity.unwrap().points.len(), 4);
    }

    #[test]
    fn test_older_report_without_scenarios_loads() {
        let report = ReportBuilder::new(AllianceNames::default()).build(&result(), context());
        let mut value = serde_json::to_value(&report).unwrap();
        let fields = value.as_object_mut().unwrap();
        for key in ["scenarios", "most_likely_scenario", "sensitivity"] {
            fields.remove(key);
        }
        let restored: ForecastReport = serde_json::from_value(value).unwrap();
        assert!(restored.scenarios.is_empty());
        assert!(restored.most_likely_scenario.is_none());
    }

    #[test]
    fn test_report_store_publish_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::open(dir.path()).unwrap();
        assert!(store.load_latest().unwrap().is_none());

        let report = ReportBuilder::new(AllianceNames::default()).build(&result(), context());
        let archived = store.publish(&report).unwrap();
        assert!(archived.exists());

        let loaded = store.load_latest().unwrap().unwrap();
        assert_eq!(loaded.metadata, report.metadata);
        assert_eq!(loaded.marginal_seats.len(), report.marginal_seats.len());
        // same cycle cannot be archived twice
        assert!(store.publish(&report).is_err());
    }

    #[test]
    fn test_staged_report_is_invisible_until_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::open(dir.path()).unwrap();
        let builder = ReportBuilder::new(AllianceNames::default());
        let first = builder.build(&result(), context());
        store.publish(&first).unwrap();

        let mut next_ctx = context();
        next_ctx.store_version += 1;
        let second = builder.build(&result(), next_ctx);

        let staged = store.stage(&second).unwrap();
        let archived = staged.archived_path().to_path_buf();
        assert!(archived.exists());
        let latest_version = || store.load_latest().unwrap().unwrap().metadata.store_version;
        assert_eq!(latest_version(), 12);

        staged.discard();
        assert!(!archived.exists());
        assert_eq!(latest_version(), 12);
        assert!(!dir.path().join("latest.json.tmp").exists());

        store.stage(&second).unwrap().promote().unwrap();
        assert_eq!(latest_version(), 13);
    }
}
