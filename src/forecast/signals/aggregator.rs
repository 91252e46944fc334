//! Weighted combination of signal records into per-scope aggregates.
//!
//! weight = recency × sqrt(sample_size) × source_quality, with
//! recency = 0.5^(age_days / half_life). Weights are normalized per
//! (scope, alliance, kind) key so they sum to 1 over contributing records.
//! A key whose weights are all zero produces no aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::record::{SignalKind, SignalRecord, SignalScope};
use crate::forecast::config::AggregatorConfig;
use crate::forecast::types::Alliance;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Recency factor for a record `age_days` old. Future timestamps count as age 0.
#[inline]
pub fn recency_weight(age_days: f64, half_life_days: f64) -> f64 {
    0.5_f64.powf(age_days.max(0.0) / half_life_days)
}

/// Raw (un-normalized) weight of one record as of `as_of`.
pub fn record_weight(record: &SignalRecord, as_of: DateTime<Utc>, half_life_days: f64) -> f64 {
    let age_days = age_days(record.observed_at, as_of);
    recency_weight(age_days, half_life_days)
        * record.sample_size.max(0.0).sqrt()
        * record.source_quality
}

/// Normalize raw weights to sum to 1. `None` when every weight is zero.
pub fn contribution_weights(raw: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = raw.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return None;
    }
    Some(raw.iter().map(|w| w / total).collect())
}

fn age_days(observed_at: DateTime<Utc>, as_of: DateTime<Utc>) -> f64 {
    (as_of - observed_at).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY
}

/// Alliance + signal kind, the inner key of an aggregate map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalKey {
    pub alliance: Alliance,
    pub kind: SignalKind,
}

impl SignalKey {
    pub const fn new(alliance: Alliance, kind: SignalKind) -> Self {
        Self { alliance, kind }
    }
}

/// One cycle's combined value for a (scope, alliance, kind) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSignal {
    /// Normalized weighted mean of the contributing values.
    pub value: f64,
    pub record_count: usize,
    /// Sum of raw weights before normalization.
    pub total_weight: f64,
    /// Weighted standard deviation; needs at least 3 records.
    pub dispersion: Option<f64>,
    /// Newest minus oldest value; needs at least 2 records.
    pub momentum: Option<f64>,
}

impl AggregatedSignal {
    /// Combine records already known to share a key. `None` when nothing
    /// carries weight.
    fn combine(records: &[&SignalRecord], as_of: DateTime<Utc>, half_life_days: f64) -> Option<Self> {
        let raw: Vec<f64> = records
            .iter()
            .map(|r| record_weight(r, as_of, half_life_days))
            .collect();
        let weights = contribution_weights(&raw)?;

        let value: f64 = records
            .iter()
            .zip(&weights)
            .map(|(r, w)| r.value * w)
            .sum();

        let dispersion = (records.len() >= 3).then(|| {
            let var: f64 = records
                .iter()
                .zip(&weights)
                .map(|(r, w)| w * (r.value - value).powi(2))
                .sum();
            var.max(0.0).sqrt()
        });

        let momentum = (records.len() >= 2).then(|| {
            let newest = records.iter().max_by_key(|r| r.observed_at);
            let oldest = records.iter().min_by_key(|r| r.observed_at);
            match (newest, oldest) {
                (Some(n), Some(o)) => n.value - o.value,
                _ => 0.0,
            }
        });

        Some(Self {
            value,
            record_count: records.len(),
            total_weight: raw.iter().sum(),
            dispersion,
            momentum,
        })
    }
}

/// Aggregates for one scope id.
pub type ScopeSignals = BTreeMap<SignalKey, AggregatedSignal>;

/// Everything the updater needs from one cycle's records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSignals {
    pub as_of: Option<DateTime<Utc>>,
    pub constituencies: BTreeMap<String, ScopeSignals>,
    pub regions: BTreeMap<String, ScopeSignals>,
    /// Records that contributed to at least one aggregate key.
    pub records_used: usize,
    /// Records dropped for exceeding the max age.
    pub records_stale: usize,
}

impl CycleSignals {
    pub fn constituency(&self, id: &str, key: SignalKey) -> Option<&AggregatedSignal> {
        self.constituencies.get(id).and_then(|m| m.get(&key))
    }

    pub fn region(&self, region: &str, key: SignalKey) -> Option<&AggregatedSignal> {
        self.regions.get(region).and_then(|m| m.get(&key))
    }

    pub fn is_empty(&self) -> bool {
        self.constituencies.is_empty() && self.regions.is_empty()
    }
}

/// Stateless aggregator; one instance can serve every cycle.
#[derive(Debug, Clone)]
pub struct SignalAggregator {
    config: AggregatorConfig,
}

impl SignalAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Combine `records` against the explicit cycle time `as_of`.
    pub fn aggregate(&self, records: &[SignalRecord], as_of: DateTime<Utc>) -> CycleSignals {
        let mut grouped: BTreeMap<(SignalScope, SignalKey), Vec<&SignalRecord>> = BTreeMap::new();
        let mut stale = 0usize;

        for record in records {
            if let Some(max_age) = self.config.max_age_days {
                if age_days(record.observed_at, as_of) > max_age {
                    stale += 1;
                    continue;
                }
            }
            grouped
                .entry((record.scope.clone(), SignalKey::new(record.alliance, record.kind)))
                .or_default()
                .push(record);
        }

        let mut out = CycleSignals {
            as_of: Some(as_of),
            records_stale: stale,
            ..Default::default()
        };

        for ((scope, key), group) in grouped {
            let Some(agg) = AggregatedSignal::combine(&group, as_of, self.config.half_life_days)
            else {
                debug!(scope = scope.id(), ?key, "All weights zero, treating as no signal");
                continue;
            };
            out.records_used += group.len();
            let target = match &scope {
                SignalScope::Constituency(id) => out.constituencies.entry(id.clone()),
                SignalScope::Region(id) => out.regions.entry(id.clone()),
            };
            target.or_default().insert(key, agg);
        }

        info!(
            records = records.len(),
            used = out.records_used,
            stale = out.records_stale,
            constituencies = out.constituencies.len(),
            regions = out.regions.len(),
            "Signals aggregated"
        );
        out
    }
}
