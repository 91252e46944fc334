//! One forecast cycle, end to end.
//!
//! Stages run strictly in sequence under the store's writer lock:
//!
//! 1. Load the committed feature store
//! 2. Check the model schema against the store schema (fatal on mismatch)
//! 3. Aggregate signals and apply EMA updates in memory
//! 4. Predict calibrated per-seat probabilities
//! 5. Simulate, run the sensitivity analysis when enabled, build the report
//! 6. Stage the report (archive copy + unpromoted `latest.json`)
//! 7. Commit the store (backup + promote), then promote the staged report
//! 8. Prune expired backups (failure only logged)
//!
//! Nothing visible changes before step 7. A failure while staging leaves the
//! committed store and the last published report exactly as they were; a
//! failed store commit withdraws the staged report.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::config::ForecastConfig;
use super::features::{
    validate_vectors, CommitReceipt, FeatureStore, FeatureUpdater, UpdateReport,
};
use super::model::{ModelCalibrator, ModelRegistry};
use super::report::{ForecastReport, ReportBuilder, ReportContext, ReportStore};
use super::signals::{SignalAggregator, SignalRecord};
use super::simulation::{MonteCarloSimulator, SeatInput, SimulationResult};
use crate::{Error, Result};

/// What a completed cycle produced.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub report: ForecastReport,
    pub simulation: SimulationResult,
    pub commit: CommitReceipt,
    pub update: UpdateReport,
    pub signals_used: usize,
    pub signals_stale: usize,
    /// Stored rows skipped while loading.
    pub skipped_rows: usize,
    pub pruned_backups: usize,
}

/// Wires the pipeline stages together.
#[derive(Debug)]
pub struct ForecastCycle {
    config: ForecastConfig,
    store: FeatureStore,
    registry: ModelRegistry,
    reports: ReportStore,
    aggregator: SignalAggregator,
    updater: FeatureUpdater,
    simulator: MonteCarloSimulator,
    builder: ReportBuilder,
}

impl ForecastCycle {
    /// Validate the config and open the on-disk stores.
    pub fn new(config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        let storage = &config.storage;
        Ok(Self {
            store: FeatureStore::open(storage.feature_dir())?,
            registry: ModelRegistry::open(storage.model_dir())?,
            reports: ReportStore::open(storage.report_dir())?,
            aggregator: SignalAggregator::new(config.aggregator.clone()),
            updater: FeatureUpdater::new(config.updater.clone()),
            simulator: MonteCarloSimulator::new(config.simulation.clone())?,
            builder: ReportBuilder::new(config.alliances.clone()),
            config,
        })
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }

    /// Run with the registry's active model.
    pub fn run(&self, records: &[SignalRecord], as_of: DateTime<Utc>) -> Result<CycleOutcome> {
        let snapshot = self
            .registry
            .load_latest()?
            .ok_or_else(|| Error::ModelNotFound(self.registry.dir().display().to_string()))?;
        let calibrator = ModelCalibrator::new(snapshot, self.config.calibrator.clone());
        self.run_with_model(&calibrator, records, as_of)
    }

    /// Run with an explicit model.
    pub fn run_with_model(
        &self,
        calibrator: &ModelCalibrator,
        records: &[SignalRecord],
        as_of: DateTime<Utc>,
    ) -> Result<CycleOutcome> {
        let lock = self.store.lock_writer()?;

        let snapshot = self
            .store
            .load_latest()?
            .ok_or_else(|| Error::StoreEmpty(self.store.base_dir().display().to_string()))?;
        if snapshot.vectors.is_empty() {
            return Err(Error::StoreEmpty(format!(
                "no readable rows in {}",
                self.store.latest_path().display()
            )));
        }
        calibrator.ensure_schema(&snapshot.header.schema)?;

        let signals = self.aggregator.aggregate(records, as_of);
        let mut vectors = snapshot.vectors;
        let update = self.updater.apply(&mut vectors, &signals, as_of);

        let quality = validate_vectors(&vectors, &self.updater.config().bounds);
        if !quality.is_clean() {
            warn!(
                duplicates = quality.duplicates.len(),
                non_finite = quality.non_finite.len(),
                out_of_bounds = quality.out_of_bounds.len(),
                "Feature vectors failed validation"
            );
            return Err(Error::invalid_input(format!(
                "updated feature vectors failed validation (quality {:.3})",
                quality.quality_score
            )));
        }

        let margin = self.config.simulation.others_contention_margin_pp;
        let seats = vectors
            .iter()
            .map(|fv| {
                let p = calibrator.predict_calibrated(fv)?;
                Ok(SeatInput::from_baseline(
                    fv.constituency_id.clone(),
                    fv.region.clone(),
                    p,
                    &fv.baseline,
                    margin,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let simulation = self.simulator.run(&seats)?;
        let sensitivity = if self.config.simulation.sensitivity.enabled {
            Some(self.simulator.sensitivity(&seats)?)
        } else {
            None
        };

        let model = calibrator.active();
        let report = self.builder.build(
            &simulation,
            ReportContext {
                generated_at: as_of,
                model_version: model.version,
                model_version_id: model.version_id.clone(),
                store_version: snapshot.header.store_version + 1,
                data_gaps: update.gaps.iter().map(|g| g.constituency_id.clone()).collect(),
                sensitivity,
            },
        );

        let staged = self.reports.stage(&report)?;
        let commit = match self.store.commit(&lock, &vectors, as_of) {
            Ok(commit) => commit,
            Err(e) => {
                staged.discard();
                return Err(e);
            }
        };
        staged.promote()?;

        let pruned_backups = match self
            .store
            .prune_backups(self.config.storage.backup_retention_days, as_of)
        {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Backup pruning failed");
                0
            }
        };
        drop(lock);

        info!(
            store_version = commit.store_version,
            model = %model.version_id,
            seats = seats.len(),
            gaps = update.gaps.len(),
            "Forecast cycle complete"
        );

        Ok(CycleOutcome {
            report,
            simulation,
            commit,
            signals_used: signals.records_used,
            signals_stale: signals.records_stale,
            skipped_rows: snapshot.skipped_rows.len(),
            update,
            pruned_backups,
        })
    }
}
