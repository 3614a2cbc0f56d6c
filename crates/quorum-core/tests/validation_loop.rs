//! End-to-end rounds of the validation loop over both event-log backends.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quorum_core::{
    kpi, AdapterOutcome, ConsensusConfig, ConsensusEngine, ConsensusLevel, DiagnosisLayer,
    EncodingEnvironment, Encoder, EventLog, Forecast, FrozenAdapter, ImprovementDecision,
    JsonlEventLog, LedgerRecord, QuorumConfig, QuorumError, SamplingSchedule, SamplingTier,
    SelectionStrategy, TestCase, ValidationLoop, ValidatorAdapter, VariableMapping,
    VariableRegistry, WeightClass,
};
use quorum_ledger::fakes::MemoryEventLog;

const YEAR: i32 = 2024;

/// Encoder whose answer depends only on the version.
struct VersionedEncoder {
    answers: BTreeMap<String, Result<Option<f64>, String>>,
}

impl VersionedEncoder {
    fn new() -> Self {
        let answers = [
            ("good".to_string(), Ok(Some(1_000.0))),
            ("off".to_string(), Ok(Some(1_400.0))),
            (
                "broken".to_string(),
                Err("Cannot express recursive phase-out".to_string()),
            ),
        ]
        .into_iter()
        .collect();
        Self { answers }
    }
}

#[async_trait]
impl Encoder for VersionedEncoder {
    async fn evaluate(
        &self,
        version: &str,
        _variable: &str,
        _inputs: &BTreeMap<String, serde_json::Value>,
        _year: i32,
    ) -> Result<Option<f64>, String> {
        self.answers.get(version).cloned().unwrap_or(Ok(None))
    }
}

fn agreeing(v: f64) -> Vec<Arc<dyn ValidatorAdapter>> {
    ["policyengine", "taxsim"]
        .into_iter()
        .map(|id| {
            Arc::new(FrozenAdapter::new(id, WeightClass::Reference).otherwise(AdapterOutcome::Value(v)))
                as Arc<dyn ValidatorAdapter>
        })
        .collect()
}

fn engine(adapters: Vec<Arc<dyn ValidatorAdapter>>) -> ConsensusEngine {
    let registry = VariableRegistry::new().with_mapping(
        VariableMapping::new("eitc", "26 USC 32").with_required_inputs(["earned_income"]),
    );
    ConsensusEngine::new(adapters, registry, ConsensusConfig::default()).unwrap()
}

fn config() -> QuorumConfig {
    QuorumConfig {
        strategy: SelectionStrategy::Latest,
        ..QuorumConfig::default()
    }
}

fn cases(n: usize) -> Vec<TestCase> {
    (0..n)
        .map(|i| TestCase::new(format!("case_{i}")).with_input("earned_income", 10_000 + i as i64))
        .collect()
}

async fn new_loop(
    adapters: Vec<Arc<dyn ValidatorAdapter>>,
    log: Arc<dyn EventLog>,
) -> ValidationLoop {
    ValidationLoop::new(&config(), engine(adapters), Arc::new(VersionedEncoder::new()), log)
        .await
        .unwrap()
}

#[tokio::test]
async fn matching_rounds_succeed_and_count_up() {
    let log = Arc::new(MemoryEventLog::new());
    let lp = new_loop(agreeing(1_000.0), log.clone()).await;
    lp.register_version("good").unwrap();

    let env = EncodingEnvironment::default();
    let first = lp.run_variable("eitc", &cases(4), YEAR, 0.5, &env).await.unwrap();
    assert_eq!(first.round, 1);
    assert_eq!(first.version, "good");
    assert_eq!(first.cases.len(), 4);
    assert_eq!(first.match_rate, 1.0);
    assert!(first.success);
    assert!(first.cases.iter().all(|c| c.diagnosis.is_none()));
    assert_eq!((first.arm.successes, first.arm.failures), (1, 0));

    let second = lp.run_variable("eitc", &cases(4), YEAR, 0.5, &env).await.unwrap();
    assert_eq!(second.round, 2);
    assert_eq!(second.entry.seq, first.entry.seq + 1);
    assert_eq!((second.arm.successes, second.arm.failures), (2, 0));

    assert_eq!(log.len(), 2);
    match &second.entry.record {
        LedgerRecord::EncodingAttempt(a) => {
            assert_eq!(a.round, 2);
            assert_eq!(a.plugin_version, "good");
            assert!(a.issues.is_empty());
            assert!(a.success);
        }
        other => panic!("unexpected record {}", other.kind()),
    }
}

#[tokio::test]
async fn mismatches_fail_the_arm_once() {
    let log = Arc::new(MemoryEventLog::new());
    let lp = new_loop(agreeing(1_000.0), log.clone()).await;
    lp.register_version("off").unwrap();

    let round = lp
        .run_variable("eitc", &cases(3), YEAR, 0.5, &EncodingEnvironment::default())
        .await
        .unwrap();
    assert_eq!(round.match_rate, 0.0);
    assert!(!round.success);
    assert!(round
        .cases
        .iter()
        .all(|c| c.result.level == ConsensusLevel::FullAgreement && !c.matched));
    assert_eq!((round.arm.successes, round.arm.failures), (0, 1));

    let LedgerRecord::EncodingAttempt(attempt) = &round.entry.record else {
        panic!("expected an encoding attempt");
    };
    assert_eq!(attempt.issues.len(), 3);
    assert!(attempt.issues[0].contains("1400.00 vs consensus 1000.00"));
}

#[tokio::test]
async fn disagreement_is_diagnosed() {
    let adapters: Vec<Arc<dyn ValidatorAdapter>> = vec![
        Arc::new(
            FrozenAdapter::new("policyengine", WeightClass::Reference)
                .otherwise(AdapterOutcome::Value(1_000.0)),
        ),
        Arc::new(
            FrozenAdapter::new("taxsim", WeightClass::Reference)
                .otherwise(AdapterOutcome::Value(1_600.0)),
        ),
    ];
    let lp = new_loop(adapters, Arc::new(MemoryEventLog::new())).await;
    lp.register_version("broken").unwrap();

    let round = lp
        .run_variable("eitc", &cases(1), YEAR, 0.5, &EncodingEnvironment::default())
        .await
        .unwrap();
    let case = &round.cases[0];
    assert_eq!(case.result.level, ConsensusLevel::Disagreement);
    assert!(case.encoder_error.is_some());

    let diagnosis = case.diagnosis.as_ref().unwrap();
    assert_eq!(diagnosis.layer, DiagnosisLayer::Validator);
    assert_eq!(diagnosis.alternative_layers, vec![DiagnosisLayer::DslCore]);
}

#[tokio::test]
async fn tiny_sampling_fraction_still_validates_a_case() {
    let mut cfg = config();
    cfg.sampling = SamplingSchedule {
        tiers: vec![SamplingTier {
            up_to: None,
            fraction: 1e-12,
        }],
    };
    let log = Arc::new(MemoryEventLog::new());
    let encoder = Arc::new(VersionedEncoder::new());
    let lp = ValidationLoop::new(&cfg, engine(agreeing(1_000.0)), encoder, log.clone())
        .await
        .unwrap();
    lp.register_version("good").unwrap();

    let round = lp
        .run_variable("eitc", &cases(5), YEAR, 0.5, &EncodingEnvironment::default())
        .await
        .unwrap();
    assert_eq!(round.cases.len(), 1);
    assert_eq!(round.match_rate, 1.0);

    let read_back = log.read_all().await.unwrap();
    let LedgerRecord::EncodingAttempt(attempt) = &read_back[0].record else {
        panic!("expected an encoding attempt");
    };
    assert_eq!(attempt.match_rate, 1.0);
}

#[tokio::test]
async fn majority_mismatch_is_diagnosed() {
    let adapters: Vec<Arc<dyn ValidatorAdapter>> = [
        ("policyengine", 1_000.0),
        ("taxsim", 1_005.0),
        ("taxact", 9_000.0),
    ]
    .into_iter()
    .map(|(id, v)| {
        Arc::new(FrozenAdapter::new(id, WeightClass::Reference).otherwise(AdapterOutcome::Value(v)))
            as Arc<dyn ValidatorAdapter>
    })
    .collect();
    let lp = new_loop(adapters, Arc::new(MemoryEventLog::new())).await;
    lp.register_version("broken").unwrap();

    let round = lp
        .run_variable("eitc", &cases(1), YEAR, 0.5, &EncodingEnvironment::default())
        .await
        .unwrap();
    let case = &round.cases[0];
    assert_eq!(case.result.level, ConsensusLevel::MajorityAgreement);
    assert!(!case.matched);

    let diagnosis = case.diagnosis.as_ref().unwrap();
    assert_eq!(diagnosis.layer, DiagnosisLayer::DslCore);
    assert_eq!(diagnosis.confidence, 1.0);
    assert!(diagnosis.alternative_layers.is_empty());

    let LedgerRecord::EncodingAttempt(attempt) = &round.entry.record else {
        panic!("expected an encoding attempt");
    };
    assert!(attempt.issues[0].ends_with("[dsl_core]"));
}

#[tokio::test]
async fn fatal_errors_leave_log_and_arms_untouched() {
    let log = Arc::new(MemoryEventLog::new());
    let lp = new_loop(agreeing(1_000.0), log.clone()).await;
    let env = EncodingEnvironment::default();

    // No arms yet.
    let err = lp.run_variable("eitc", &cases(2), YEAR, 0.5, &env).await.unwrap_err();
    assert!(matches!(err, QuorumError::NoArms));

    lp.register_version("good").unwrap();
    let err = lp.run_variable("agi", &cases(2), YEAR, 0.5, &env).await.unwrap_err();
    assert!(matches!(err, QuorumError::UnknownVariable(_)));

    let err = lp.run_variable("eitc", &[], YEAR, 0.5, &env).await.unwrap_err();
    assert!(matches!(err, QuorumError::InvalidConfig(_)));

    let err = lp.run_variable("eitc", &cases(2), YEAR, 1.5, &env).await.unwrap_err();
    assert!(matches!(err, QuorumError::InvalidConfidence(_)));

    assert!(log.is_empty());
    assert_eq!(lp.bandit().arm("good").unwrap().attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_round_updates_nothing() {
    let slow: Vec<Arc<dyn ValidatorAdapter>> = vec![Arc::new(
        FrozenAdapter::new("policyengine", WeightClass::Primary)
            .otherwise(AdapterOutcome::Value(1_000.0))
            .with_delay(Duration::from_secs(20)),
    )];
    let log = Arc::new(MemoryEventLog::new());
    let lp = new_loop(slow, log.clone()).await;
    lp.register_version("good").unwrap();

    let env = EncodingEnvironment::default();
    let cut = tokio::time::timeout(
        Duration::from_secs(1),
        lp.run_variable("eitc", &cases(2), YEAR, 0.5, &env),
    )
    .await;
    assert!(cut.is_err());

    assert!(log.is_empty());
    assert_eq!(lp.bandit().arm("good").unwrap().attempts(), 0);
}

#[tokio::test]
async fn jsonl_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.jsonl");

    {
        let log = Arc::new(JsonlEventLog::open(&path).await.unwrap());
        let lp = new_loop(agreeing(1_000.0), log).await;
        lp.register_version("good").unwrap();
        lp.register_version("broken").unwrap();
        let round = lp
            .run_variable("eitc", &cases(2), YEAR, 0.5, &EncodingEnvironment::default())
            .await
            .unwrap();
        assert_eq!(round.version, "broken");
        assert!(!round.success);

        let decision = ImprovementDecision::new("d-1", "teach the DSL recursion", DiagnosisLayer::DslCore)
            .with_forecast(kpi::MATCH_RATE, Forecast::new(0.9, 0.8, 1.0));
        lp.record_decision(decision.clone()).await.unwrap();
        let err = lp.record_decision(decision).await.unwrap_err();
        assert!(matches!(err, QuorumError::DuplicateDecision(_)));

        let actuals = [(kpi::MATCH_RATE.to_string(), 0.95)].into_iter().collect();
        let scored = lp.record_outcome("d-1", actuals).await.unwrap();
        assert_eq!(scored.len(), 1);
        assert!(scored[0].in_confidence_interval);
    }

    let log = Arc::new(JsonlEventLog::open(&path).await.unwrap());
    assert_eq!(log.read_all().await.unwrap().len(), 3);

    let lp = new_loop(agreeing(1_000.0), log).await;
    let broken = lp.bandit().arm("broken").unwrap();
    assert_eq!((broken.successes, broken.failures), (0, 1));

    let summary = lp.calibration_summary(Some(kpi::MATCH_RATE));
    assert_eq!(summary.n_decisions, 1);
    assert_eq!(summary.coverage, 1.0);

    // Only arms with logged attempts are restored.
    assert!(lp.register_version("good").is_ok());
    let round = lp
        .run_variable("eitc", &cases(2), YEAR, 0.5, &EncodingEnvironment::default())
        .await
        .unwrap();
    assert_eq!(round.round, 2);
    assert_eq!(round.version, "good");
    assert!(round.success);

    let plan = lp.plan(&["eitc".to_string(), "ctc".to_string()]).await.unwrap();
    assert_eq!(plan.selected.first().map(String::as_str), Some("ctc"));
}
