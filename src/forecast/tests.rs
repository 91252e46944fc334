//! End-to-end cycle tests against a temporary data directory.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use super::config::ForecastConfig;
use super::cycle::ForecastCycle;
use super::features::{BaselineShares, ConstituencyBaseline, FEATURE_NAMES};
use super::model::{
    FeatureSchema, IsotonicCalibration, LogisticClassifier, ModelCalibrator, ModelSnapshot,
};
use super::signals::{SignalRecord, SignalScope};
use super::simulation::{ScenarioBand, SeatClass, SensitivityFactor};
use super::types::Alliance;
use crate::{Error, StorageError};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()
}

fn config(dir: &TempDir) -> ForecastConfig {
    let mut cfg = ForecastConfig::default();
    cfg.storage.data_dir = dir.path().to_path_buf();
    cfg.simulation.n_simulations = 1000;
    cfg.simulation.national_shock_sd = 0.0;
    cfg.simulation.regional_shock_sd = 0.0;
    cfg.simulation.workers = Some(2);
    cfg.simulation.sensitivity.n_simulations = 200;
    cfg
}

fn baselines() -> Vec<ConstituencyBaseline> {
    let row = |id: &str, region: &str, a, b| ConstituencyBaseline {
        constituency_id: id.to_string(),
        region: region.to_string(),
        shares: BaselineShares::new(a, b, 100.0 - a - b),
    };
    vec![
        row("C1", "North", 55.0, 35.0),
        row("C2", "North", 35.0, 55.0),
        row("C3", "South", 45.0, 45.0),
    ]
}

/// A model that only looks at the poll lead: 0.2 logits per point.
fn lead_model(version: u64) -> ModelSnapshot {
    let d = FEATURE_NAMES.len();
    let lead = FEATURE_NAMES
        .iter()
        .position(|n| *n == "poll_lead")
        .unwrap();
    let mut weights = vec![0.0; d];
    weights[lead] = 0.2;
    let classifier =
        LogisticClassifier::from_parts(weights, 0.0, vec![0.0; d], vec![1.0; d]).unwrap();
    ModelSnapshot::from_parts(
        version,
        t0() - Duration::days(1),
        FeatureSchema::current(),
        classifier,
        IsotonicCalibration::identity(),
    )
}

fn bootstrapped(dir: &TempDir) -> ForecastCycle {
    let cycle = ForecastCycle::new(config(dir)).unwrap();
    let lock = cycle.store().lock_writer().unwrap();
    cycle
        .store()
        .bootstrap(&lock, &baselines(), 2.5, t0() - Duration::days(1))
        .unwrap();
    cycle
}

fn calibrator() -> ModelCalibrator {
    ModelCalibrator::new(lead_model(1), ForecastConfig::default().calibrator)
}

#[test]
fn test_single_sentiment_signal_moves_feature_by_alpha() {
    let dir = TempDir::new().unwrap();
    let cycle = bootstrapped(&dir);
    let records = vec![SignalRecord::sentiment(
        SignalScope::Constituency("C3".into()),
        Alliance::A,
        1.0,
        t0(),
    )];

    let outcome = cycle.run_with_model(&calibrator(), &records, t0()).unwrap();
    assert_eq!(outcome.signals_used, 1);
    assert_eq!(outcome.commit.store_version, 2);

    let stored = cycle.store().load_latest().unwrap().unwrap();
    let c3 = stored
        .vectors
        .iter()
        .find(|v| v.constituency_id == "C3")
        .unwrap();
    assert!((c3.sentiment_a - 0.3).abs() < 1e-12);
    assert_eq!(c3.sentiment_b, 0.0);
    assert_eq!(c3.update_count, 1);
    assert_eq!(c3.last_updated, t0());

    // C1 and C2 had no coverage
    assert_eq!(outcome.update.gaps.len(), 2);
    let untouched = stored
        .vectors
        .iter()
        .find(|v| v.constituency_id == "C1")
        .unwrap();
    assert_eq!(untouched.update_count, 0);
}

#[test]
fn test_cycle_conserves_seats_and_rates_them() {
    let dir = TempDir::new().unwrap();
    let cycle = bootstrapped(&dir);
    let outcome = cycle.run_with_model(&calibrator(), &[], t0()).unwrap();
    let sim = &outcome.simulation;

    assert_eq!(sim.total_seats, 3);
    assert_eq!(sim.tallies.len(), 1000);
    assert!(sim.tallies.iter().all(|t| t.total() == 3));

    let report = &outcome.report;
    let seats = &report.seat_classes;
    assert_eq!(seats.safe + seats.lean + seats.toss_up, 3);
    // C1 and C2 sit 20pp apart from a tie, C3 is dead even
    assert_eq!(seats.safe, 2);
    assert_eq!(seats.toss_up, 1);
    assert_eq!(report.marginal_seats.len(), 1);
    assert_eq!(report.marginal_seats[0].constituency_id, "C3");
    assert_eq!(report.marginal_seats[0].label, SeatClass::TossUp);

    let mean_total: f64 = report.alliances.iter().map(|a| a.mean_seats).sum();
    assert!((mean_total - 3.0).abs() < 1e-9);
    assert_eq!(report.metadata.store_version, outcome.commit.store_version);
    assert_eq!(report.metadata.model_version, 1);

    let published = cycle.reports().load_latest().unwrap().unwrap();
    assert_eq!(published.metadata.store_version, 2);
}

#[test]
fn test_same_seed_same_report() {
    let run = || {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.simulation.national_shock_sd = 0.02;
        cfg.simulation.regional_shock_sd = 0.03;
        let cycle = ForecastCycle::new(cfg).unwrap();
        let lock = cycle.store().lock_writer().unwrap();
        cycle
            .store()
            .bootstrap(&lock, &baselines(), 2.5, t0() - Duration::days(1))
            .unwrap();
        drop(lock);
        cycle.run_with_model(&calibrator(), &[], t0()).unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first.simulation.tallies, second.simulation.tallies);
    assert_eq!(first.report, second.report);
}

#[test]
fn test_schema_mismatch_aborts_without_writing() {
    let dir = TempDir::new().unwrap();
    let cycle = bootstrapped(&dir);
    cycle.run_with_model(&calibrator(), &[], t0()).unwrap();
    let store_before = std::fs::read(cycle.store().latest_path()).unwrap();
    let report_before = cycle.reports().load_latest().unwrap();

    let mut names = FeatureSchema::current().names;
    names.pop();
    names.push("turnout".to_string());
    let d = names.len();
    let snapshot = ModelSnapshot::from_parts(
        2,
        t0(),
        FeatureSchema::from_names(names),
        LogisticClassifier::from_parts(vec![0.0; d], 0.0, vec![0.0; d], vec![1.0; d]).unwrap(),
        IsotonicCalibration::identity(),
    );
    let mismatched = ModelCalibrator::new(snapshot, ForecastConfig::default().calibrator);

    let records = vec![SignalRecord::sentiment(
        SignalScope::Region("North".into()),
        Alliance::B,
        0.8,
        t0() + Duration::hours(6),
    )];
    let err = cycle
        .run_with_model(&mismatched, &records, t0() + Duration::hours(6))
        .unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));
    assert!(err.is_cycle_fatal());

    assert_eq!(std::fs::read(cycle.store().latest_path()).unwrap(), store_before);
    assert_eq!(cycle.reports().load_latest().unwrap(), report_before);
    assert_eq!(cycle.store().list_backups().unwrap().len(), 2);
}

#[test]
fn test_extreme_polls_stay_within_bounds() {
    let dir = TempDir::new().unwrap();
    let cycle = bootstrapped(&dir);
    let bounds = ForecastConfig::default().updater.bounds;

    let mut as_of = t0();
    for _ in 0..20 {
        let records = vec![
            SignalRecord::poll(SignalScope::Constituency("C2".into()), Alliance::A, 100.0, as_of)
                .with_sample_size(1e6),
            SignalRecord::poll(SignalScope::Constituency("C2".into()), Alliance::B, 0.0, as_of),
            SignalRecord::sentiment(SignalScope::Region("North".into()), Alliance::A, 1.0, as_of),
        ];
        cycle.run_with_model(&calibrator(), &records, as_of).unwrap();
        as_of += Duration::hours(6);
    }

    let stored = cycle.store().load_latest().unwrap().unwrap();
    for fv in &stored.vectors {
        assert!(fv.out_of_bounds(&bounds).is_empty(), "{fv:?}");
        assert!(fv.all_finite());
    }
    let c2 = stored
        .vectors
        .iter()
        .find(|v| v.constituency_id == "C2")
        .unwrap();
    assert!(c2.poll_lead > 45.0 && c2.poll_lead <= bounds.poll_lead.max);
    assert_eq!(c2.update_count, 20);
}

#[test]
fn test_missing_model_and_store() {
    let dir = TempDir::new().unwrap();
    let cycle = ForecastCycle::new(config(&dir)).unwrap();

    let err = cycle.run(&[], t0()).unwrap_err();
    assert!(matches!(err, Error::ModelNotFound(_)));

    let err = cycle.run_with_model(&calibrator(), &[], t0()).unwrap_err();
    assert!(matches!(err, Error::StoreEmpty(_)));
}

#[test]
fn test_run_uses_registry_model() {
    let dir = TempDir::new().unwrap();
    let cycle = bootstrapped(&dir);
    cycle.registry().save(&lead_model(1), t0()).unwrap();

    let outcome = cycle.run(&[], t0()).unwrap();
    assert_eq!(outcome.report.metadata.model_version, 1);
    assert_eq!(
        outcome.report.metadata.model_version_id,
        lead_model(1).version_id
    );
}

#[test]
fn test_even_seats_pushed_toward_a_concentrate_forecast() {
    let dir = TempDir::new().unwrap();
    let cycle = ForecastCycle::new(config(&dir)).unwrap();
    let even: Vec<_> = ["E1", "E2", "E3"]
        .iter()
        .map(|id| ConstituencyBaseline {
            constituency_id: id.to_string(),
            region: "Central".to_string(),
            shares: BaselineShares::new(50.0, 50.0, 0.0),
        })
        .collect();
    let lock = cycle.store().lock_writer().unwrap();
    cycle
        .store()
        .bootstrap(&lock, &even, 2.5, t0() - Duration::days(1))
        .unwrap();
    drop(lock);

    // Sentiment advantage drives the score: +0.3 gives logit 6
    let d = FEATURE_NAMES.len();
    let advantage = FEATURE_NAMES
        .iter()
        .position(|n| *n == "sentiment_advantage")
        .unwrap();
    let mut weights = vec![0.0; d];
    weights[advantage] = 20.0;
    let model = ModelSnapshot::from_parts(
        1,
        t0() - Duration::days(1),
        FeatureSchema::current(),
        LogisticClassifier::from_parts(weights, 0.0, vec![0.0; d], vec![1.0; d]).unwrap(),
        IsotonicCalibration::identity(),
    );
    let calibrator = ModelCalibrator::new(model, ForecastConfig::default().calibrator);

    let records: Vec<_> = ["E1", "E2", "E3"]
        .iter()
        .map(|id| {
            SignalRecord::sentiment(
                SignalScope::Constituency(id.to_string()),
                Alliance::A,
                1.0,
                t0(),
            )
        })
        .collect();
    let outcome = cycle.run_with_model(&calibrator, &records, t0()).unwrap();

    let stored = cycle.store().load_latest().unwrap().unwrap();
    for fv in &stored.vectors {
        assert!((fv.sentiment_a - 0.3).abs() < 1e-12);
        assert_eq!(fv.poll_lead, 0.0);
    }
    assert_eq!(outcome.update.updated, 3);
    assert!(outcome.update.gaps.is_empty());

    let sim = &outcome.simulation;
    assert!(sim.seats.iter().all(|s| s.rating.class == SeatClass::Safe));
    assert!(sim.tallies.iter().all(|t| t.others == 0));
    let a = &sim.distributions.a;
    assert_eq!(a.percentiles.p50, 3.0);
    assert_eq!(a.spread_90(), 0.0);
    assert!(a.mean > 2.9);
    assert!(outcome.report.marginal_seats.is_empty());
}

fn committed_version(cycle: &ForecastCycle) -> u64 {
    cycle
        .store()
        .load_latest()
        .unwrap()
        .unwrap()
        .header
        .store_version
}

#[test]
fn test_report_write_failure_leaves_store_uncommitted() {
    let dir = TempDir::new().unwrap();
    let cycle = bootstrapped(&dir);
    assert_eq!(committed_version(&cycle), 1);

    // The archive this cycle would write already exists
    let taken = cycle
        .reports()
        .dir()
        .join("report_20240301_060000_v000002.json");
    std::fs::write(&taken, "{}").unwrap();

    let err = cycle.run_with_model(&calibrator(), &[], t0()).unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::BackupExists(_))));
    assert_eq!(committed_version(&cycle), 1);
    assert_eq!(cycle.store().list_backups().unwrap().len(), 1);
    assert!(cycle.reports().load_latest().unwrap().is_none());
    assert_eq!(std::fs::read_to_string(&taken).unwrap(), "{}");
}

#[test]
fn test_store_commit_failure_withdraws_staged_report() {
    let dir = TempDir::new().unwrap();
    let cycle = bootstrapped(&dir);

    // The feature backup this cycle would write already exists
    let backup = cycle
        .store()
        .base_dir()
        .join("backups")
        .join("features_2024-03-01_060000.jsonl");
    std::fs::write(&backup, "").unwrap();

    let err = cycle.run_with_model(&calibrator(), &[], t0()).unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::BackupExists(_))));
    assert_eq!(committed_version(&cycle), 1);
    assert!(cycle.reports().load_latest().unwrap().is_none());
    assert!(!cycle
        .reports()
        .dir()
        .join("report_20240301_060000_v000002.json")
        .exists());

    // Once the obstruction is gone the same cycle goes through
    std::fs::remove_file(&backup).unwrap();
    let outcome = cycle.run_with_model(&calibrator(), &[], t0()).unwrap();
    assert_eq!(outcome.commit.store_version, 2);
    assert_eq!(
        cycle.reports().load_latest().unwrap().unwrap().metadata.store_version,
        2
    );
}

#[test]
fn test_report_carries_scenarios_and_sensitivity() {
    let dir = TempDir::new().unwrap();
    let cycle = bootstrapped(&dir);
    let outcome = cycle.run_with_model(&calibrator(), &[], t0()).unwrap();
    let report = &outcome.report;

    assert_eq!(report.scenarios.len(), 7);
    let most_likely = report.most_likely_scenario.as_ref().unwrap();
    assert!(report
        .scenarios
        .iter()
        .all(|s| s.probability <= most_likely.probability));
    let a_majority = report
        .scenarios
        .iter()
        .find(|s| s.alliance == Some(Alliance::A) && s.band == ScenarioBand::Majority)
        .unwrap();
    assert_eq!(a_majority.min_seats, Some(2));
    assert_eq!(a_majority.probability, outcome.simulation.majority_probability.a);

    let sensitivity = report.sensitivity.as_ref().unwrap();
    assert_eq!(sensitivity.n_simulations, 200);
    // shocks are off, so scaling them changes nothing
    let uncertainty: Vec<_> = sensitivity.factor(SensitivityFactor::Uncertainty).collect();
    assert!(uncertainty
        .iter()
        .all(|p| p.majority_probability == uncertainty[0].majority_probability));
    let swing: Vec<_> = sensitivity.factor(SensitivityFactor::NationalSwing).collect();
    assert!(swing
        .windows(2)
        .all(|w| w[0].mean_seats.a <= w[1].mean_seats.a));

    let published = cycle.reports().load_latest().unwrap().unwrap();
    assert_eq!(published.sensitivity.map(|s| s.points.len()), Some(17));
}

#[test]
fn test_sensitivity_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config(&dir);
    cfg.simulation.sensitivity.enabled = false;
    let cycle = ForecastCycle::new(cfg).unwrap();
    let lock = cycle.store().lock_writer().unwrap();
    cycle
        .store()
        .bootstrap(&lock, &baselines(), 2.5, t0() - Duration::days(1))
        .unwrap();
    drop(lock);

    let outcome = cycle.run_with_model(&calibrator(), &[], t0()).unwrap();
    assert!(outcome.report.sensitivity.is_none());
    assert!(!outcome.report.scenarios.is_empty());
}
