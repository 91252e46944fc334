//! Per-constituency feature vector and its baseline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forecast::config::{Bound, FeatureBounds};
use crate::forecast::types::Alliance;

/// Names of the features exposed to the model, in schema order.
pub const FEATURE_NAMES: [&str; 10] = [
    "baseline_a",
    "baseline_b",
    "baseline_others",
    "baseline_margin",
    "sentiment_a",
    "sentiment_b",
    "sentiment_advantage",
    "poll_lead",
    "poll_momentum",
    "poll_volatility",
];

/// Historical vote shares in percentage points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineShares {
    pub a: f64,
    pub b: f64,
    pub others: f64,
}

impl BaselineShares {
    pub fn new(a: f64, b: f64, others: f64) -> Self {
        Self { a, b, others }
    }

    /// A minus B, in pp.
    pub fn margin(&self) -> f64 {
        self.a - self.b
    }

    pub fn share(&self, alliance: Alliance) -> f64 {
        match alliance {
            Alliance::A => self.a,
            Alliance::B => self.b,
            Alliance::Others => self.others,
        }
    }

    pub fn is_valid(&self) -> bool {
        [self.a, self.b, self.others]
            .iter()
            .all(|v| v.is_finite() && (0.0..=100.0).contains(v))
    }
}

/// One baseline input row for bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstituencyBaseline {
    pub constituency_id: String,
    pub region: String,
    pub shares: BaselineShares,
}

/// The smoothed state of one constituency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstituencyFeatureVector {
    pub constituency_id: String,
    pub region: String,
    pub baseline: BaselineShares,
    /// Smoothed sentiment toward A, in [-1, 1].
    pub sentiment_a: f64,
    /// Smoothed sentiment toward B, in [-1, 1].
    pub sentiment_b: f64,
    /// Smoothed A-minus-B poll lead in pp.
    pub poll_lead: f64,
    pub poll_momentum: f64,
    pub poll_volatility: f64,
    pub last_updated: DateTime<Utc>,
    pub update_count: u64,
}

impl ConstituencyFeatureVector {
    /// Initial state at bootstrap: poll lead equals the baseline margin,
    /// neutral sentiment, flat momentum.
    pub fn from_baseline(
        baseline: &ConstituencyBaseline,
        initial_volatility: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            constituency_id: baseline.constituency_id.clone(),
            region: baseline.region.clone(),
            baseline: baseline.shares,
            sentiment_a: 0.0,
            sentiment_b: 0.0,
            poll_lead: baseline.shares.margin(),
            poll_momentum: 0.0,
            poll_volatility: initial_volatility,
            last_updated: created_at,
            update_count: 0,
        }
    }

    pub fn sentiment(&self, alliance: Alliance) -> Option<f64> {
        match alliance {
            Alliance::A => Some(self.sentiment_a),
            Alliance::B => Some(self.sentiment_b),
            Alliance::Others => None,
        }
    }

    /// Sets sentiment for A or B; `Others` has no sentiment feature.
    pub fn set_sentiment(&mut self, alliance: Alliance, value: f64) {
        match alliance {
            Alliance::A => self.sentiment_a = value,
            Alliance::B => self.sentiment_b = value,
            Alliance::Others => {}
        }
    }

    pub fn sentiment_advantage(&self) -> f64 {
        self.sentiment_a - self.sentiment_b
    }

    /// Look up a feature by schema name.
    pub fn feature_value(&self, name: &str) -> Option<f64> {
        let v = match name {
            "baseline_a" => self.baseline.a,
            "baseline_b" => self.baseline.b,
            "baseline_others" => self.baseline.others,
            "baseline_margin" => self.baseline.margin(),
            "sentiment_a" => self.sentiment_a,
            "sentiment_b" => self.sentiment_b,
            "sentiment_advantage" => self.sentiment_advantage(),
            "poll_lead" => self.poll_lead,
            "poll_momentum" => self.poll_momentum,
            "poll_volatility" => self.poll_volatility,
            _ => return None,
        };
        Some(v)
    }

    fn bounded_mut<'a>(
        &'a mut self,
        bounds: &FeatureBounds,
    ) -> [(&'a mut f64, Bound); 5] {
        [
            (&mut self.sentiment_a, bounds.sentiment),
            (&mut self.sentiment_b, bounds.sentiment),
            (&mut self.poll_lead, bounds.poll_lead),
            (&mut self.poll_momentum, bounds.poll_momentum),
            (&mut self.poll_volatility, bounds.poll_volatility),
        ]
    }

    /// Clip every bounded feature; returns how many needed clipping.
    pub fn enforce_bounds(&mut self, bounds: &FeatureBounds) -> usize {
        let mut clipped = 0;
        for (value, bound) in self.bounded_mut(bounds) {
            let fixed = bound.clip(*value);
            if fixed != *value || value.is_nan() {
                clipped += 1;
            }
            *value = fixed;
        }
        clipped
    }

    /// Names of bounded features currently outside their bounds.
    pub fn out_of_bounds(&self, bounds: &FeatureBounds) -> Vec<&'static str> {
        let checks = [
            ("sentiment_a", self.sentiment_a, bounds.sentiment),
            ("sentiment_b", self.sentiment_b, bounds.sentiment),
            ("poll_lead", self.poll_lead, bounds.poll_lead),
            ("poll_momentum", self.poll_momentum, bounds.poll_momentum),
            ("poll_volatility", self.poll_volatility, bounds.poll_volatility),
        ];
        checks
            .into_iter()
            .filter(|(_, v, b)| !b.contains(*v))
            .map(|(name, _, _)| name)
            .collect()
    }

    pub fn all_finite(&self) -> bool {
        FEATURE_NAMES
            .iter()
            .filter_map(|name| self.feature_value(name))
            .all(f64::is_finite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vector() -> ConstituencyFeatureVector {
        let baseline = ConstituencyBaseline {
            constituency_id: "AC_010".to_string(),
            region: "Coast".to_string(),
            shares: BaselineShares::new(42.0, 38.0, 20.0),
        };
        ConstituencyFeatureVector::from_baseline(
            &baseline,
            2.5,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_from_baseline() {
        let fv = vector();
        assert_eq!(fv.poll_lead, 4.0);
        assert_eq!(fv.sentiment_a, 0.0);
        assert_eq!(fv.poll_volatility, 2.5);
        assert_eq!(fv.update_count, 0);
    }

    #[test]
    fn test_feature_lookup_covers_schema() {
        let fv = vector();
        for name in FEATURE_NAMES {
            assert!(fv.feature_value(name).is_some(), "missing {name}");
        }
        assert_eq!(fv.feature_value("baseline_margin"), Some(4.0));
        assert_eq!(fv.feature_value("turnout"), None);
    }

    #[test]
    fn test_enforce_bounds() {
        let bounds = FeatureBounds::default();
        let mut fv = vector();
        fv.sentiment_a = 3.0;
        fv.poll_lead = -80.0;
        fv.poll_volatility = f64::NAN;
        assert_eq!(fv.out_of_bounds(&bounds).len(), 3);

        assert_eq!(fv.enforce_bounds(&bounds), 3);
        assert_eq!(fv.sentiment_a, 1.0);
        assert_eq!(fv.poll_lead, -50.0);
        assert_eq!(fv.poll_volatility, 10.0);
        assert!(fv.out_of_bounds(&bounds).is_empty());
        assert_eq!(fv.enforce_bounds(&bounds), 0);
    }

    #[test]
    fn test_others_has_no_sentiment() {
        let mut fv = vector();
        fv.set_sentiment(Alliance::Others, 0.9);
        fv.set_sentiment(Alliance::B, -0.4);
        assert_eq!(fv.sentiment(Alliance::Others), None);
        assert_eq!(fv.sentiment_advantage(), 0.4);
    }
}
