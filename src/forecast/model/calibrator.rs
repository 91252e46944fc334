//! Active model with bounded-window refresh and rollback.
//!
//! A refresh slides the training window forward (most recent `window_size`
//! labeled samples by observation time), retrains classifier and calibration,
//! re-validates monotonicity and only then swaps the candidate in. A rejected
//! candidate leaves the active snapshot untouched.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::classifier::LabeledSample;
use super::schema::FeatureSchema;
use super::snapshot::ModelSnapshot;
use crate::forecast::config::CalibratorConfig;
use crate::forecast::features::ConstituencyFeatureVector;
use crate::{Error, Result};

/// Outcome of an accepted refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub previous_version: u64,
    pub new_version: u64,
    pub window_samples: usize,
    /// Incoming samples that were already in the window.
    pub duplicates_ignored: usize,
    pub brier_before: f64,
    pub brier_after: f64,
}

/// Holds the active snapshot and the versions it replaced.
#[derive(Debug, Clone)]
pub struct ModelCalibrator {
    config: CalibratorConfig,
    active: ModelSnapshot,
    /// Replaced snapshots, most recent last.
    previous: Vec<ModelSnapshot>,
}

impl ModelCalibrator {
    pub fn new(active: ModelSnapshot, config: CalibratorConfig) -> Self {
        Self {
            config,
            active,
            previous: Vec::new(),
        }
    }

    /// Train the first snapshot (version 1) from labeled history.
    pub fn train_initial(
        samples: Vec<LabeledSample>,
        config: CalibratorConfig,
        as_of: DateTime<Utc>,
    ) -> Result<Self> {
        let window = sliding_window(samples, config.window_size);
        let snapshot = ModelSnapshot::train(1, window, FeatureSchema::current(), &config, as_of)?;
        Ok(Self::new(snapshot, config))
    }

    pub fn active(&self) -> &ModelSnapshot {
        &self.active
    }

    pub fn previous_versions(&self) -> impl Iterator<Item = u64> + '_ {
        self.previous.iter().map(|s| s.version)
    }

    /// Fatal when the model was trained on a different feature layout.
    pub fn ensure_schema(&self, store_schema: &[String]) -> Result<()> {
        self.active.schema.ensure_matches(store_schema)
    }

    /// Uncalibrated classifier score.
    pub fn predict(&self, fv: &ConstituencyFeatureVector) -> Result<f64> {
        self.active.raw_probability(fv)
    }

    /// Calibrated P(A wins).
    pub fn predict_calibrated(&self, fv: &ConstituencyFeatureVector) -> Result<f64> {
        self.active.calibrated_probability(fv)
    }

    /// Retrain on the active window plus `new_samples`, keeping the most
    /// recent `window_size`. `version` must be unused in the registry.
    ///
    /// Fails with `InsufficientTrainingData` or `CalibrationRegression`
    /// without changing the active snapshot.
    pub fn refresh(
        &mut self,
        new_samples: Vec<LabeledSample>,
        version: u64,
        as_of: DateTime<Utc>,
    ) -> Result<RefreshReport> {
        if version <= self.active.version {
            return Err(Error::invalid_input(format!(
                "refresh version {version} must exceed active version {}",
                self.active.version
            )));
        }

        let mut combined = self.active.training_window.clone();
        let before = combined.len();
        let mut duplicates = 0;
        for sample in new_samples {
            let seen = combined.iter().any(|s| {
                s.constituency_id == sample.constituency_id && s.observed_at == sample.observed_at
            });
            if seen {
                duplicates += 1;
            } else {
                combined.push(sample);
            }
        }
        let added = combined.len() - before;
        let window = sliding_window(combined, self.config.window_size);
        let window_samples = window.len();

        let candidate = match ModelSnapshot::train(
            version,
            window,
            self.active.schema.clone(),
            &self.config,
            as_of,
        ) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    active_version = self.active.version,
                    candidate_version = version,
                    error = %e,
                    "Refresh rejected, keeping active model"
                );
                return Err(e);
            }
        };

        let report = RefreshReport {
            previous_version: self.active.version,
            new_version: candidate.version,
            window_samples,
            duplicates_ignored: duplicates,
            brier_before: self.active.metrics.brier_score,
            brier_after: candidate.metrics.brier_score,
        };
        let replaced = std::mem::replace(&mut self.active, candidate);
        self.previous.push(replaced);

        info!(
            from = report.previous_version,
            to = report.new_version,
            added,
            window = window_samples,
            "Model refreshed"
        );
        Ok(report)
    }

    /// Reinstate the snapshot replaced by the last refresh.
    pub fn rollback(&mut self) -> Result<&ModelSnapshot> {
        let restored = self.previous.pop().ok_or_else(|| {
            Error::ModelNotFound(format!(
                "no version before v{} to roll back to",
                self.active.version
            ))
        })?;
        let dropped = std::mem::replace(&mut self.active, restored);
        info!(
            from = dropped.version,
            to = self.active.version,
            "Model rolled back"
        );
        Ok(&self.active)
    }
}

/// Most recent `size` samples by observation time, oldest first.
fn sliding_window(mut samples: Vec<LabeledSample>, size: usize) -> Vec<LabeledSample> {
    samples.sort_by_key(|s| s.observed_at);
    let skip = samples.len().saturating_sub(size);
    samples.split_off(skip)
}
