//! Versioned, self-describing model artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::classifier::{LabeledSample, LogisticClassifier};
use super::isotonic::IsotonicCalibration;
use super::schema::FeatureSchema;
use crate::forecast::config::CalibratorConfig;
use crate::forecast::features::ConstituencyFeatureVector;
use crate::{Error, Result};

/// In-sample quality of a fitted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Mean squared error of calibrated probabilities.
    pub brier_score: f64,
    /// Share of samples where calibrated p >= 0.5 matches the outcome.
    pub accuracy: f64,
    pub samples: usize,
    /// Share of samples won by A.
    pub positive_rate: f64,
}

/// Classifier + calibration + the window they were fitted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub version: u64,
    /// `v000003_20251015_060000`
    pub version_id: String,
    pub trained_at: DateTime<Utc>,
    pub schema: FeatureSchema,
    pub classifier: LogisticClassifier,
    pub calibration: IsotonicCalibration,
    /// Samples the snapshot was fitted on, oldest first. The next refresh
    /// slides over this window.
    pub training_window: Vec<LabeledSample>,
    pub metrics: ModelMetrics,
}

pub fn format_version_id(version: u64, trained_at: DateTime<Utc>) -> String {
    format!("v{version:06}_{}", trained_at.format("%Y%m%d_%H%M%S"))
}

impl ModelSnapshot {
    /// Fit classifier and calibration on `window` and validate the result.
    pub fn train(
        version: u64,
        window: Vec<LabeledSample>,
        schema: FeatureSchema,
        config: &CalibratorConfig,
        trained_at: DateTime<Utc>,
    ) -> Result<Self> {
        if let Some(bad) = window.iter().find(|s| s.features.len() != schema.len()) {
            return Err(Error::schema_mismatch(
                &schema.names,
                &[format!("{} values for {}", bad.features.len(), bad.constituency_id)],
            ));
        }

        let classifier = LogisticClassifier::fit(&window, config)?;
        let raw: Vec<f64> = window.iter().map(|s| classifier.score(&s.features)).collect();
        let outcomes: Vec<bool> = window.iter().map(|s| s.a_won).collect();
        let calibration = IsotonicCalibration::fit(&raw, &outcomes);

        let metrics = metrics(&calibration, &raw, &outcomes);
        let snapshot = Self {
            version,
            version_id: format_version_id(version, trained_at),
            trained_at,
            schema,
            classifier,
            calibration,
            training_window: window,
            metrics,
        };
        snapshot.validate(config.monotonic_grid_points)?;
        snapshot.check_quality(config.max_brier_score)?;

        info!(
            version = snapshot.version,
            version_id = %snapshot.version_id,
            samples = snapshot.metrics.samples,
            brier = snapshot.metrics.brier_score,
            accuracy = snapshot.metrics.accuracy,
            "Model snapshot trained"
        );
        Ok(snapshot)
    }

    /// Assemble a snapshot from already-fitted parts (no validation).
    pub fn from_parts(
        version: u64,
        trained_at: DateTime<Utc>,
        schema: FeatureSchema,
        classifier: LogisticClassifier,
        calibration: IsotonicCalibration,
    ) -> Self {
        Self {
            version,
            version_id: format_version_id(version, trained_at),
            trained_at,
            schema,
            classifier,
            calibration,
            training_window: Vec::new(),
            metrics: ModelMetrics {
                brier_score: 0.0,
                accuracy: 0.0,
                samples: 0,
                positive_rate: 0.0,
            },
        }
    }

    /// Reject a candidate that fits its own window worse than `max_brier`.
    pub fn check_quality(&self, max_brier: f64) -> Result<()> {
        if self.metrics.brier_score > max_brier {
            return Err(Error::CalibrationRegression {
                candidate_version: self.version,
                reason: format!(
                    "in-sample Brier score {:.4} exceeds {max_brier:.4}",
                    self.metrics.brier_score
                ),
            });
        }
        Ok(())
    }

    /// Calibration must be a monotone map into [0, 1].
    pub fn validate(&self, grid_points: usize) -> Result<()> {
        self.calibration
            .validate_monotonic(grid_points)
            .map_err(|reason| Error::CalibrationRegression {
                candidate_version: self.version,
                reason,
            })
    }

    pub fn raw_probability(&self, fv: &ConstituencyFeatureVector) -> Result<f64> {
        let x = self.schema.extract(fv)?;
        Ok(self.classifier.score(&x))
    }

    pub fn calibrated_probability(&self, fv: &ConstituencyFeatureVector) -> Result<f64> {
        let raw = self.raw_probability(fv)?;
        Ok(self.calibration.apply(raw))
    }

    /// (first, last) observation time of the training window.
    pub fn window_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.training_window.first()?.observed_at;
        let last = self.training_window.last()?.observed_at;
        Some((first, last))
    }
}

fn metrics(calibration: &IsotonicCalibration, raw: &[f64], outcomes: &[bool]) -> ModelMetrics {
    let n = raw.len().max(1) as f64;
    let mut brier = 0.0;
    let mut correct = 0usize;
    for (score, won) in raw.iter().zip(outcomes) {
        let p = calibration.apply(*score);
        let y = if *won { 1.0 } else { 0.0 };
        brier += (p - y).powi(2);
        if (p >= 0.5) == *won {
            correct += 1;
        }
    }
    ModelMetrics {
        brier_score: brier / n,
        accuracy: correct as f64 / n,
        samples: raw.len(),
        positive_rate: outcomes.iter().filter(|w| **w).count() as f64 / n,
    }
}
