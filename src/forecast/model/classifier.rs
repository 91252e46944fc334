//! Logistic scoring classifier for "A wins the seat".
//!
//! Inputs are standardized with the training means / scales, then fitted by
//! full-batch gradient descent with an L2 penalty and balanced class weights.
//! The raw score is only required to be monotone in the evidence; isotonic
//! calibration maps it to a probability afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::schema::FeatureSchema;
use crate::forecast::config::CalibratorConfig;
use crate::forecast::features::ConstituencyFeatureVector;
use crate::{Error, Result};

/// Numerically stable logistic function.
#[inline]
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// One historical outcome in model-input form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub constituency_id: String,
    /// Feature values in schema order.
    pub features: Vec<f64>,
    pub a_won: bool,
    pub observed_at: DateTime<Utc>,
}

impl LabeledSample {
    pub fn from_vector(
        fv: &ConstituencyFeatureVector,
        schema: &FeatureSchema,
        a_won: bool,
        observed_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            constituency_id: fv.constituency_id.clone(),
            features: schema.extract(fv)?,
            a_won,
            observed_at,
        })
    }

    fn label(&self) -> f64 {
        if self.a_won {
            1.0
        } else {
            0.0
        }
    }
}

/// A feature vector with its known result, as read from training files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledOutcome {
    pub vector: ConstituencyFeatureVector,
    pub a_won: bool,
    pub observed_at: DateTime<Utc>,
}

impl LabeledOutcome {
    pub fn to_sample(&self, schema: &FeatureSchema) -> Result<LabeledSample> {
        LabeledSample::from_vector(&self.vector, schema, self.a_won, self.observed_at)
    }
}

/// Fitted logistic model over standardized features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticClassifier {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub feature_means: Vec<f64>,
    pub feature_scales: Vec<f64>,
}

impl LogisticClassifier {
    /// Build from explicit parameters.
    pub fn from_parts(
        weights: Vec<f64>,
        bias: f64,
        feature_means: Vec<f64>,
        feature_scales: Vec<f64>,
    ) -> Result<Self> {
        let d = weights.len();
        if feature_means.len() != d || feature_scales.len() != d {
            return Err(Error::invalid_input(format!(
                "classifier parts disagree on dimension: {d} weights, {} means, {} scales",
                feature_means.len(),
                feature_scales.len()
            )));
        }
        if feature_scales.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(Error::invalid_input("feature scales must be positive"));
        }
        Ok(Self {
            weights,
            bias,
            feature_means,
            feature_scales,
        })
    }

    /// Fit on `samples`. Requires `min_samples` rows and both outcome classes.
    pub fn fit(samples: &[LabeledSample], config: &CalibratorConfig) -> Result<Self> {
        let n = samples.len();
        if n < config.min_samples {
            return Err(Error::InsufficientTrainingData(format!(
                "{n} samples, need at least {}",
                config.min_samples
            )));
        }
        let positives = samples.iter().filter(|s| s.a_won).count();
        if positives == 0 || positives == n {
            return Err(Error::InsufficientTrainingData(format!(
                "single outcome class in window ({positives}/{n} A wins)"
            )));
        }
        let d = samples[0].features.len();
        if d == 0 || samples.iter().any(|s| s.features.len() != d) {
            return Err(Error::invalid_input("samples disagree on feature dimension"));
        }
        if samples
            .iter()
            .any(|s| s.features.iter().any(|v| !v.is_finite()))
        {
            return Err(Error::invalid_input("non-finite feature in training samples"));
        }

        let nf = n as f64;
        let mut means = vec![0.0; d];
        for s in samples {
            for (m, v) in means.iter_mut().zip(&s.features) {
                *m += v / nf;
            }
        }
        let mut scales = vec![0.0; d];
        for s in samples {
            for ((sc, v), m) in scales.iter_mut().zip(&s.features).zip(&means) {
                *sc += (v - m).powi(2) / nf;
            }
        }
        for sc in scales.iter_mut() {
            *sc = if *sc > 1e-12 { sc.sqrt() } else { 1.0 };
        }

        let standardized: Vec<Vec<f64>> = samples
            .iter()
            .map(|s| {
                s.features
                    .iter()
                    .zip(&means)
                    .zip(&scales)
                    .map(|((v, m), sc)| (v - m) / sc)
                    .collect()
            })
            .collect();

        // Balanced class weights: each class contributes half the loss
        let w_pos = nf / (2.0 * positives as f64);
        let w_neg = nf / (2.0 * (n - positives) as f64);

        let mut weights = vec![0.0; d];
        let mut bias = 0.0;
        for _ in 0..config.epochs {
            let mut grad_w = vec![0.0; d];
            let mut grad_b = 0.0;
            for (x, s) in standardized.iter().zip(samples) {
                let z = bias + dot(&weights, x);
                let class_weight = if s.a_won { w_pos } else { w_neg };
                let err = (sigmoid(z) - s.label()) * class_weight;
                for (g, xi) in grad_w.iter_mut().zip(x) {
                    *g += err * xi;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= config.learning_rate * (g / nf + config.l2_penalty * *w);
            }
            bias -= config.learning_rate * grad_b / nf;
        }

        if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::InsufficientTrainingData(
                "gradient descent diverged".to_string(),
            ));
        }

        debug!(samples = n, positives, features = d, bias, "Classifier fitted");

        Ok(Self {
            weights,
            bias,
            feature_means: means,
            feature_scales: scales,
        })
    }

    /// Raw probability-like score in (0, 1).
    pub fn score(&self, features: &[f64]) -> f64 {
        let z: f64 = self.bias
            + features
                .iter()
                .zip(&self.feature_means)
                .zip(&self.feature_scales)
                .zip(&self.weights)
                .map(|(((v, m), sc), w)| w * (v - m) / sc)
                .sum::<f64>();
        sigmoid(z)
    }

    pub fn dimension(&self) -> usize {
        self.weights.len()
    }

    /// |weight| per feature on the standardized scale, normalized to sum to 1.
    pub fn feature_importance(&self) -> Vec<f64> {
        let total: f64 = self.weights.iter().map(|w| w.abs()).sum();
        if total <= 0.0 {
            return vec![0.0; self.weights.len()];
        }
        self.weights.iter().map(|w| w.abs() / total).collect()
    }
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
