//! Forecast calibration across many decisions, plus ledger replay.

use std::collections::BTreeMap;

use chrono::Utc;
use quorum_core::{
    kpi, CalibrationConfig, CalibrationStatus, CalibrationTracker, DiagnosisLayer, Forecast,
    ImprovementDecision, QuorumError,
};
use quorum_ledger::fakes::MemoryEventLog;
use quorum_ledger::{EventLog, RunId};

fn decision(i: usize) -> ImprovementDecision {
    ImprovementDecision::new(
        format!("d-{i:03}"),
        "add phase-out primitive",
        DiagnosisLayer::DslCore,
    )
    .with_forecast(kpi::MATCH_RATE, Forecast::new(0.90, 0.85, 0.95))
}

fn actuals(match_rate: f64) -> BTreeMap<String, f64> {
    [(kpi::MATCH_RATE.to_string(), match_rate)].into_iter().collect()
}

/// 100 decisions, 80 of them landing inside their interval.
fn eighty_percent_tracker() -> CalibrationTracker {
    let mut tracker = CalibrationTracker::default();
    for i in 0..100 {
        tracker.record_decision(decision(i)).unwrap();
        let actual = if i % 5 == 0 { 0.70 } else { 0.91 };
        tracker
            .record_outcome(&format!("d-{i:03}"), actuals(actual), Utc::now())
            .unwrap();
    }
    tracker
}

#[test]
fn eighty_percent_coverage_is_well_calibrated() {
    let summary = eighty_percent_tracker().summary(Some(kpi::MATCH_RATE));
    assert_eq!(summary.n_decisions, 100);
    assert_eq!(summary.n_forecasts, 100);
    assert!((0.75..=0.85).contains(&summary.coverage));
    assert_ne!(summary.status, CalibrationStatus::Overconfident);
    assert_eq!(summary.status, CalibrationStatus::WellCalibrated);
    assert!(summary.calibration_error.abs() < 1e-9);
    // 80 * 0.01 + 20 * -0.20, over 100
    assert!((summary.bias - (-0.032)).abs() < 1e-9);
    assert!((summary.mean_interval_width - 0.10).abs() < 1e-9);
}

#[test]
fn narrow_intervals_read_as_overconfident() {
    let mut tracker = CalibrationTracker::default();
    for i in 0..10 {
        tracker.record_decision(decision(i)).unwrap();
        let actual = if i < 5 { 0.90 } else { 0.50 };
        tracker
            .record_outcome(&format!("d-{i:03}"), actuals(actual), Utc::now())
            .unwrap();
    }
    assert_eq!(tracker.summary(None).status, CalibrationStatus::Overconfident);
}

#[test]
fn unscored_decisions_do_not_count() {
    let mut tracker = CalibrationTracker::default();
    tracker.record_decision(decision(0)).unwrap();
    tracker.record_decision(decision(1)).unwrap();
    tracker
        .record_outcome("d-000", actuals(0.9), Utc::now())
        .unwrap();

    let summary = tracker.summary(None);
    assert_eq!(summary.n_decisions, 1);
    assert_eq!(summary.coverage, 1.0);
    assert_eq!(summary.status, CalibrationStatus::Underconfident);
}

#[test]
fn outcomes_are_scored_once() {
    let mut tracker = CalibrationTracker::default();
    tracker.record_decision(decision(0)).unwrap();
    tracker
        .record_outcome("d-000", actuals(0.9), Utc::now())
        .unwrap();

    let err = tracker
        .record_outcome("d-000", actuals(0.5), Utc::now())
        .unwrap_err();
    assert!(matches!(err, QuorumError::DecisionAlreadyScored(_)));

    let err = tracker
        .record_outcome("missing", actuals(0.5), Utc::now())
        .unwrap_err();
    assert!(matches!(err, QuorumError::DecisionNotFound(_)));

    let err = tracker.record_decision(decision(0)).unwrap_err();
    assert!(matches!(err, QuorumError::DuplicateDecision(_)));
}

#[test]
fn invalid_bands_are_rejected() {
    let config = CalibrationConfig {
        target_coverage: 0.80,
        band_low: 0.90,
        band_high: 0.70,
    };
    assert!(CalibrationTracker::new(config).is_err());
}

#[tokio::test]
async fn replay_reproduces_the_summary() {
    let original = eighty_percent_tracker();
    let log = MemoryEventLog::new();
    let run = RunId::new();
    for record in original.records() {
        log.append(&run, record).await.unwrap();
    }

    let entries = log.read_all().await.unwrap();
    let rebuilt = CalibrationTracker::replay(CalibrationConfig::default(), &entries).unwrap();

    let before = original.summary(Some(kpi::MATCH_RATE));
    let after = rebuilt.summary(Some(kpi::MATCH_RATE));
    assert_eq!(before.n_forecasts, after.n_forecasts);
    assert_eq!(before.coverage, after.coverage);
    assert_eq!(before.status, after.status);

    let ids: Vec<&str> = rebuilt.decisions().map(|d| d.decision_id.as_str()).collect();
    assert_eq!(ids.first(), Some(&"d-000"));
    assert_eq!(ids.len(), 100);
    assert_eq!(
        rebuilt.decision("d-042").map(|d| d.target_layer),
        Some(DiagnosisLayer::DslCore)
    );
}
