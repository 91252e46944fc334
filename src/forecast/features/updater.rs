//! EMA smoothing of aggregated signals into feature vectors.
//!
//! For every bounded feature: clip the target, `new = α·target + (1-α)·old`,
//! clip again. Constituencies lacking direct coverage move by
//! `regional_fraction` of their region's shift instead; constituencies with no
//! signal at all are left untouched and reported as data gaps.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::vector::ConstituencyFeatureVector;
use crate::forecast::config::{Bound, UpdaterConfig};
use crate::forecast::signals::{AggregatedSignal, CycleSignals, SignalKey, SignalKind};
use crate::forecast::types::Alliance;

/// Exponential moving average step.
#[inline]
pub fn ema(alpha: f64, old: f64, target: f64) -> f64 {
    alpha * target + (1.0 - alpha) * old
}

/// Constituency that received no signal this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DataGap {
    pub constituency_id: String,
    pub region: String,
}

/// Per-cycle outcome of [`FeatureUpdater::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    /// Vectors with at least one direct (constituency-scoped) signal.
    pub updated: usize,
    /// Vectors moved only by the regional modifier.
    pub regional_only: usize,
    pub gaps: Vec<DataGap>,
    /// Targets or results that had to be clipped into bounds.
    pub clipped: usize,
}

/// Where a feature's target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coverage {
    Direct,
    Regional,
}

#[derive(Debug, Clone, Copy, Default)]
struct VectorOutcome {
    direct: bool,
    regional: bool,
    clipped: usize,
}

impl VectorOutcome {
    fn record(&mut self, coverage: Coverage) {
        match coverage {
            Coverage::Direct => self.direct = true,
            Coverage::Regional => self.regional = true,
        }
    }
}

/// Applies one cycle's aggregates to the store's vectors.
#[derive(Debug, Clone)]
pub struct FeatureUpdater {
    config: UpdaterConfig,
}

impl FeatureUpdater {
    pub fn new(config: UpdaterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Update every vector in place.
    pub fn apply(
        &self,
        vectors: &mut [ConstituencyFeatureVector],
        signals: &CycleSignals,
        as_of: DateTime<Utc>,
    ) -> UpdateReport {
        let mut report = UpdateReport::default();

        for fv in vectors.iter_mut() {
            let outcome = self.update_vector(fv, signals);
            report.clipped += outcome.clipped;

            if outcome.direct || outcome.regional {
                fv.update_count += 1;
                fv.last_updated = as_of;
                if outcome.direct {
                    report.updated += 1;
                } else {
                    report.regional_only += 1;
                }
                debug!(
                    constituency = %fv.constituency_id,
                    sentiment_a = fv.sentiment_a,
                    sentiment_b = fv.sentiment_b,
                    poll_lead = fv.poll_lead,
                    regional_only = !outcome.direct,
                    "Feature vector updated"
                );
            } else {
                report.gaps.push(DataGap {
                    constituency_id: fv.constituency_id.clone(),
                    region: fv.region.clone(),
                });
            }
        }

        info!(
            updated = report.updated,
            regional_only = report.regional_only,
            gaps = report.gaps.len(),
            clipped = report.clipped,
            "Feature update applied"
        );
        report
    }

    fn update_vector(
        &self,
        fv: &mut ConstituencyFeatureVector,
        signals: &CycleSignals,
    ) -> VectorOutcome {
        let mut outcome = VectorOutcome::default();
        let bounds = self.config.bounds.clone();

        for alliance in Alliance::CONTESTING {
            let key = SignalKey::new(alliance, SignalKind::Sentiment);
            let Some((agg, coverage)) = lookup(signals, fv, key) else {
                continue;
            };
            let old = fv.sentiment(alliance).unwrap_or(0.0);
            let new = self.smooth(
                old,
                agg.value,
                coverage,
                self.config.sentiment_alpha,
                bounds.sentiment,
                &mut outcome.clipped,
            );
            fv.set_sentiment(alliance, new);
            outcome.record(coverage);
        }

        if let Some(coverage) = self.update_polls(fv, signals, &mut outcome.clipped) {
            outcome.record(coverage);
        }

        outcome.clipped += fv.enforce_bounds(&bounds);
        outcome
    }

    /// Poll lead, momentum and volatility from the narrowest scope that has
    /// any poll for A or B.
    fn update_polls(
        &self,
        fv: &mut ConstituencyFeatureVector,
        signals: &CycleSignals,
        clipped: &mut usize,
    ) -> Option<Coverage> {
        let key_a = SignalKey::new(Alliance::A, SignalKind::Poll);
        let key_b = SignalKey::new(Alliance::B, SignalKind::Poll);

        let direct = (
            signals.constituency(&fv.constituency_id, key_a),
            signals.constituency(&fv.constituency_id, key_b),
        );
        let regional = (
            signals.region(&fv.region, key_a),
            signals.region(&fv.region, key_b),
        );
        let ((poll_a, poll_b), coverage) = match (direct, regional) {
            ((None, None), (None, None)) => return None,
            ((None, None), regional) => (regional, Coverage::Regional),
            (direct, _) => (direct, Coverage::Direct),
        };

        let bounds = self.config.bounds.clone();
        let alpha = self.config.poll_alpha;

        let share_a = poll_a.map_or(fv.baseline.a, |s| s.value);
        let share_b = poll_b.map_or(fv.baseline.b, |s| s.value);
        fv.poll_lead = self.smooth(
            fv.poll_lead,
            share_a - share_b,
            coverage,
            alpha,
            bounds.poll_lead,
            clipped,
        );

        let mom_a = poll_a.and_then(|s| s.momentum);
        let mom_b = poll_b.and_then(|s| s.momentum);
        if mom_a.is_some() || mom_b.is_some() {
            let target = mom_a.unwrap_or(0.0) - mom_b.unwrap_or(0.0);
            fv.poll_momentum = self.smooth(
                fv.poll_momentum,
                target,
                coverage,
                alpha,
                bounds.poll_momentum,
                clipped,
            );
        }

        let dispersion = [poll_a, poll_b]
            .into_iter()
            .flatten()
            .filter_map(|s| s.dispersion)
            .reduce(f64::max);
        if let Some(target) = dispersion {
            fv.poll_volatility = self.smooth(
                fv.poll_volatility,
                target,
                coverage,
                alpha,
                bounds.poll_volatility,
                clipped,
            );
        }

        Some(coverage)
    }

    /// Regional modifier, clip, EMA, clip.
    fn smooth(
        &self,
        old: f64,
        raw_target: f64,
        coverage: Coverage,
        alpha: f64,
        bound: Bound,
        clipped: &mut usize,
    ) -> f64 {
        let target = match coverage {
            Coverage::Direct => raw_target,
            Coverage::Regional => old + self.config.regional_fraction * (raw_target - old),
        };
        let target_clipped = bound.clip(target);
        if target_clipped != target {
            *clipped += 1;
        }
        bound.clip(ema(alpha, old, target_clipped))
    }
}

fn lookup<'a>(
    signals: &'a CycleSignals,
    fv: &ConstituencyFeatureVector,
    key: SignalKey,
) -> Option<(&'a AggregatedSignal, Coverage)> {
    signals
        .constituency(&fv.constituency_id, key)
        .map(|s| (s, Coverage::Direct))
        .or_else(|| signals.region(&fv.region, key).map(|s| (s, Coverage::Regional)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::config::AggregatorConfig;
    use crate::forecast::features::vector::{BaselineShares, ConstituencyBaseline};
    use crate::forecast::signals::{SignalAggregator, SignalRecord, SignalScope};
    use chrono::{Duration, TimeZone};

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 15, 0, 0, 0).unwrap()
    }

    fn vectors() -> Vec<ConstituencyFeatureVector> {
        [("AC_1", "North"), ("AC_2", "North"), ("AC_3", "South")]
            .iter()
            .map(|(id, region)| {
                let baseline = ConstituencyBaseline {
                    constituency_id: id.to_string(),
                    region: region.to_string(),
                    shares: BaselineShares::new(40.0, 40.0, 20.0),
                };
                ConstituencyFeatureVector::from_baseline(
                    &baseline,
                    2.5,
                    as_of() - Duration::days(7),
                )
            })
            .collect()
    }

    fn signals(records: &[SignalRecord]) -> CycleSignals {
        SignalAggregator::new(AggregatorConfig::default()).aggregate(records, as_of())
    }

    fn seat(id: &str) -> SignalScope {
        SignalScope::Constituency(id.to_string())
    }

    fn region(id: &str) -> SignalScope {
        SignalScope::Region(id.to_string())
    }

    #[test]
    fn test_ema_formula() {
        assert!((ema(0.3, 0.0, 1.0) - 0.3).abs() < 1e-12);
        assert!((ema(0.3, 0.5, 0.5) - 0.5).abs() < 1e-12);
        assert_eq!(ema(1.0, -0.2, 0.7), 0.7);
    }

    #[test]
    fn test_direct_sentiment_follows_ema() {
        let updater = FeatureUpdater::new(UpdaterConfig::default());
        let mut fvs = vectors();
        fvs[0].sentiment_a = 0.2;
        let s = signals(&[SignalRecord::sentiment(seat("AC_1"), Alliance::A, 0.6, as_of())]);

        let report = updater.apply(&mut fvs, &s, as_of());
        assert!((fvs[0].sentiment_a - (0.3 * 0.6 + 0.7 * 0.2)).abs() < 1e-12);
        assert_eq!(fvs[0].update_count, 1);
        assert_eq!(fvs[0].last_updated, as_of());
        assert_eq!(report.updated, 1);
        assert_eq!(report.clipped, 0);
    }

    #[test]
    fn test_regional_modifier_and_gap() {
        let updater = FeatureUpdater::new(UpdaterConfig::default());
        let mut fvs = vectors();
        let s = signals(&[
            SignalRecord::sentiment(region("North"), Alliance::B, 0.8, as_of()),
            SignalRecord::sentiment(seat("AC_1"), Alliance::B, -0.4, as_of()),
        ]);

        let report = updater.apply(&mut fvs, &s, as_of());
        // AC_1 direct: 0.3 * -0.4
        assert!((fvs[0].sentiment_b + 0.12).abs() < 1e-12);
        // AC_2 regional: target = 0 + 0.5 * 0.8 = 0.4, then EMA -> 0.12
        assert!((fvs[1].sentiment_b - 0.12).abs() < 1e-12);
        // AC_3 untouched
        assert_eq!(fvs[2].sentiment_b, 0.0);
        assert_eq!(fvs[2].update_count, 0);

        assert_eq!(report.updated, 1);
        assert_eq!(report.regional_only, 1);
        assert_eq!(
            report.gaps,
            vec![DataGap {
                constituency_id: "AC_3".to_string(),
                region: "South".to_string()
            }]
        );
    }

    #[test]
    fn test_poll_lead_uses_baseline_for_missing_side() {
        let updater = FeatureUpdater::new(UpdaterConfig::default());
        let mut fvs = vectors();
        let s = signals(&[SignalRecord::poll(seat("AC_3"), Alliance::A, 50.0, as_of())]);

        updater.apply(&mut fvs, &s, as_of());
        // target lead 50 - 40 (baseline B) = 10, from 0
        assert!((fvs[2].poll_lead - 3.0).abs() < 1e-12);
        assert_eq!(fvs[2].poll_momentum, 0.0);
    }

    #[test]
    fn test_poll_momentum_and_volatility() {
        let updater = FeatureUpdater::new(UpdaterConfig::default());
        let mut fvs = vectors();
        let records: Vec<_> = [(6, 38.0), (4, 42.0), (0, 46.0)]
            .into_iter()
            .map(|(days, v)| {
                SignalRecord::poll(seat("AC_1"), Alliance::A, v, as_of() - Duration::days(days))
            })
            .collect();
        let s = signals(&records);
        let agg = s.constituency("AC_1", SignalKey::new(Alliance::A, SignalKind::Poll)).unwrap();

        updater.apply(&mut fvs, &s, as_of());
        assert!((fvs[0].poll_momentum - 0.3 * 8.0).abs() < 1e-9);
        let expected_vol = 0.3 * agg.dispersion.unwrap() + 0.7 * 2.5;
        assert!((fvs[0].poll_volatility - expected_vol).abs() < 1e-9);
    }

    #[test]
    fn test_adversarial_input_stays_in_bounds() {
        let config = UpdaterConfig {
            sentiment_alpha: 1.0,
            poll_alpha: 1.0,
            ..Default::default()
        };
        let bounds = config.bounds.clone();
        let updater = FeatureUpdater::new(config);
        let mut fvs = vectors();
        fvs[0].poll_lead = 1e9;

        let s = signals(&[
            SignalRecord::poll(seat("AC_1"), Alliance::A, 100.0, as_of()),
            SignalRecord::poll(seat("AC_1"), Alliance::B, 0.0, as_of()),
            SignalRecord::sentiment(seat("AC_1"), Alliance::A, 1.0, as_of()),
        ]);
        let report = updater.apply(&mut fvs, &s, as_of());

        for fv in &fvs {
            assert!(fv.out_of_bounds(&bounds).is_empty());
        }
        assert_eq!(fvs[0].poll_lead, 50.0);
        assert!(report.clipped >= 1);
    }

    #[test]
    fn test_no_signals_changes_nothing() {
        let updater = FeatureUpdater::new(UpdaterConfig::default());
        let mut fvs = vectors();
        let before = fvs.clone();
        let report = updater.apply(&mut fvs, &CycleSignals::default(), as_of());
        assert_eq!(fvs, before);
        assert_eq!(report.gaps.len(), 3);
    }
}
