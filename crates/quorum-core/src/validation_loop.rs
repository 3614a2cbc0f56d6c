//! The decision-and-learning loop.
//!
//! One round for a variable: sample cases, pick an encoder version with the
//! bandit, validate each sampled case by consensus, diagnose failures,
//! append one encoding-attempt record and route exactly one outcome to the
//! chosen arm. Decisions and their outcomes go through the same log and
//! feed the calibration tracker.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use quorum_ledger::{EncodingAttemptRecord, EventLog, LedgerEntry, LedgerRecord, RunId};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::Instrument;

use crate::bandit::{Arm, BanditSelector, SelectionStrategy};
use crate::calibration::{
    CalibrationSummary, CalibrationTracker, ImprovementDecision, ScoredForecast,
};
use crate::config::QuorumConfig;
use crate::consensus::{ConsensusEngine, ConsensusLevel, ConsensusResult};
use crate::diagnosis::{DiagnosisClassifier, EncodingEnvironment, FailureContext, FailureDiagnosis};
use crate::domain::{QuorumError, Result, TestCase};
use crate::obs;
use crate::sampling::{SamplePlan, SamplingController};

/// Runs an encoded variable under a given encoder version.
///
/// `Ok(None)` means the encoding produced no value for the inputs;
/// `Err` carries the encoder's error message, which feeds diagnosis.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn evaluate(
        &self,
        version: &str,
        variable: &str,
        inputs: &BTreeMap<String, serde_json::Value>,
        year: i32,
    ) -> std::result::Result<Option<f64>, String>;
}

/// One validated case within a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub test_case: String,
    pub encoder_version: String,
    pub encoder_value: Option<f64>,
    pub encoder_error: Option<String>,
    pub result: ConsensusResult,
    /// Present when the level needs diagnosis, or when the case failed
    /// short of a confirmed agreement.
    pub diagnosis: Option<FailureDiagnosis>,
    /// The encoder agreed with the validators' consensus value.
    pub matched: bool,
}

impl CaseOutcome {
    fn issue(&self) -> Option<String> {
        if self.matched {
            return None;
        }
        let what = match (&self.encoder_error, self.encoder_value) {
            (Some(err), _) => format!("encoder error: {err}"),
            (None, None) => "encoder produced no value".to_string(),
            (None, Some(v)) if self.result.level == ConsensusLevel::Disagreement => {
                format!("validators disagree (encoder {v:.2})")
            }
            (None, Some(v)) => format!(
                "encoder {v:.2} vs consensus {:.2}",
                self.result.consensus_value
            ),
        };
        Some(match &self.diagnosis {
            Some(d) => format!("{}: {what} [{}]", self.test_case, d.layer),
            None => format!("{}: {what}", self.test_case),
        })
    }
}

/// Summary of one round for a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRound {
    pub variable: String,
    pub version: String,
    pub round: u32,
    pub population: usize,
    pub fraction: f64,
    pub cases: Vec<CaseOutcome>,
    pub match_rate: f64,
    pub reward_signal: f64,
    pub success: bool,
    /// The encoding-attempt entry as appended.
    pub entry: LedgerEntry,
    /// The arm after the outcome was applied.
    pub arm: Arm,
}

/// History facts derived from the event log.
struct History {
    rounds: BTreeMap<String, u32>,
    tested: BTreeSet<String>,
}

impl History {
    fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut rounds: BTreeMap<String, u32> = BTreeMap::new();
        for entry in entries {
            if let LedgerRecord::EncodingAttempt(a) = &entry.record {
                let r = rounds.entry(a.variable.clone()).or_default();
                *r = (*r).max(a.round);
            }
        }
        let tested = rounds.keys().cloned().collect();
        Self { rounds, tested }
    }

    fn validated_so_far(&self) -> u64 {
        self.tested.len() as u64
    }
}

pub struct ValidationLoop {
    run_id: RunId,
    engine: ConsensusEngine,
    encoder: Arc<dyn Encoder>,
    log: Arc<dyn EventLog>,
    bandit: BanditSelector,
    sampler: SamplingController,
    classifier: DiagnosisClassifier,
    calibration: Mutex<CalibrationTracker>,
    strategy: SelectionStrategy,
    success_match_rate: f64,
}

impl ValidationLoop {
    /// Build a loop and restore arm counts and calibration state from `log`.
    pub async fn new(
        config: &QuorumConfig,
        engine: ConsensusEngine,
        encoder: Arc<dyn Encoder>,
        log: Arc<dyn EventLog>,
    ) -> Result<Self> {
        config.check()?;
        let entries = log.read_all().await?;
        let bandit = BanditSelector::with_seed(config.seed);
        bandit.replay(&entries);
        let calibration = CalibrationTracker::replay(config.calibration.clone(), &entries)?;

        let run_id = RunId::new();
        tracing::info!(
            run_id = %run_id,
            entries = entries.len(),
            arms = bandit.arms().len(),
            strategy = %config.strategy,
            "validation loop ready"
        );
        Ok(Self {
            run_id,
            engine,
            encoder,
            log,
            bandit,
            sampler: SamplingController::new(config.sampling.clone(), config.seed)?,
            classifier: DiagnosisClassifier::standard(),
            calibration: Mutex::new(calibration),
            strategy: config.strategy,
            success_match_rate: config.success_match_rate,
        })
    }

    pub fn with_classifier(mut self, classifier: DiagnosisClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.engine
    }

    pub fn bandit(&self) -> &BanditSelector {
        &self.bandit
    }

    /// Make an encoder version available for selection.
    pub fn register_version(&self, version: impl Into<String>) -> Result<Arm> {
        self.bandit.register_arm(version)
    }

    fn tracker(&self) -> MutexGuard<'_, CalibrationTracker> {
        self.calibration.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calibration_summary(&self, kpi: Option<&str>) -> CalibrationSummary {
        self.tracker().summary(kpi)
    }

    pub fn calibration_by_kpi(&self) -> BTreeMap<String, CalibrationSummary> {
        self.tracker().summary_by_kpi()
    }

    /// Which of `variables` to validate next, given the log's history.
    pub async fn plan(&self, variables: &[String]) -> Result<SamplePlan> {
        let history = History::from_entries(&self.log.read_all().await?);
        Ok(self
            .sampler
            .plan(variables, &history.tested, history.validated_so_far()))
    }

    async fn append(&self, record: LedgerRecord) -> Result<LedgerEntry> {
        let kind = record.kind();
        let entry = self.log.append(&self.run_id, record).await?;
        obs::emit_ledger_appended(&self.run_id.to_string(), kind, entry.seq);
        Ok(entry)
    }

    /// Validate one variable under a bandit-selected encoder version.
    ///
    /// Fatal validation errors abort the round before anything is
    /// appended or any arm is touched. If the returned future is dropped,
    /// no arm is updated.
    pub async fn run_variable(
        &self,
        variable: &str,
        cases: &[TestCase],
        year: i32,
        confidence: f64,
        env: &EncodingEnvironment,
    ) -> Result<VariableRound> {
        self.run_variable_inner(variable, cases, year, confidence, env)
            .instrument(obs::run_span(&self.run_id.to_string()))
            .await
    }

    async fn run_variable_inner(
        &self,
        variable: &str,
        cases: &[TestCase],
        year: i32,
        confidence: f64,
        env: &EncodingEnvironment,
    ) -> Result<VariableRound> {
        let started = Instant::now();
        let mapping = self.engine.registry().get(variable)?.clone();
        if cases.is_empty() {
            return Err(QuorumError::InvalidConfig(format!(
                "no test cases for {variable}"
            )));
        }

        let history = History::from_entries(&self.log.read_all().await?);
        let round = history.rounds.get(variable).copied().unwrap_or(0) + 1;
        let fraction = self.sampler.sample_fraction(history.validated_so_far());
        let sampled = self
            .sampler
            .select_cases(cases, history.validated_so_far());

        let version = self.bandit.select(self.strategy)?;

        let outcomes = try_join_all(sampled.iter().map(|case| {
            self.validate_case(&version, variable, case, year, confidence, env, &mapping.required_inputs)
        }))
        .await?;

        let matched = outcomes.iter().filter(|o| o.matched).count();
        let match_rate = matched as f64 / outcomes.len() as f64;
        let reward_signal =
            outcomes.iter().map(|o| o.result.reward_signal).sum::<f64>() / outcomes.len() as f64;
        let success = match_rate >= self.success_match_rate;

        let attempt = EncodingAttemptRecord {
            timestamp: Utc::now(),
            variable: variable.to_string(),
            round,
            plugin_version: version.clone(),
            match_rate,
            reward_signal,
            issues: outcomes.iter().filter_map(CaseOutcome::issue).collect(),
            duration_seconds: started.elapsed().as_secs_f64(),
            success,
        };
        let entry = self.append(LedgerRecord::EncodingAttempt(attempt)).await?;

        // Nothing awaits between the append and the arm update.
        let arm = self.bandit.record_outcome(&version, success)?;

        tracing::info!(
            variable = %variable,
            version = %version,
            round,
            sampled = outcomes.len(),
            population = cases.len(),
            match_rate,
            success,
            "round complete"
        );

        Ok(VariableRound {
            variable: variable.to_string(),
            version,
            round,
            population: cases.len(),
            fraction,
            cases: outcomes,
            match_rate,
            reward_signal,
            success,
            entry,
            arm,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn validate_case(
        &self,
        version: &str,
        variable: &str,
        case: &TestCase,
        year: i32,
        confidence: f64,
        env: &EncodingEnvironment,
        required_inputs: &[String],
    ) -> Result<CaseOutcome> {
        let encoded = self
            .encoder
            .evaluate(version, variable, &case.inputs, year)
            .await;
        let detail = self
            .engine
            .validate_detailed(case, variable, year, confidence)
            .await?;

        let (encoder_value, encoder_error) = match encoded {
            Ok(value) => (value.filter(|v| v.is_finite()), None),
            Err(message) => (None, Some(message)),
        };

        let result = &detail.result;
        let matched = match encoder_value {
            Some(v) => {
                result.level != ConsensusLevel::Disagreement
                    && (v - result.consensus_value).abs() <= result.tolerance
            }
            None => false,
        };

        let diagnose =
            result.level.needs_diagnosis() || (!matched && !result.level.is_confirmed());
        let diagnosis = diagnose.then(|| {
            let mut ctx = FailureContext::from_validation(&detail, case)
                .with_environment(env)
                .with_required_inputs(required_inputs.iter().cloned());
            if let Some(message) = &encoder_error {
                ctx = ctx.with_error(message.clone());
            }
            self.classifier.diagnose(&ctx)
        });

        Ok(CaseOutcome {
            test_case: case.name.clone(),
            encoder_version: version.to_string(),
            encoder_value,
            encoder_error,
            result: detail.result,
            diagnosis,
            matched,
        })
    }

    /// Record a proposed improvement and its forecasts.
    pub async fn record_decision(&self, decision: ImprovementDecision) -> Result<LedgerEntry> {
        self.tracker().check_decision(&decision)?;
        let entry = self
            .append(LedgerRecord::Decision(decision.to_record()))
            .await?;
        self.tracker().record_decision(decision)?;
        Ok(entry)
    }

    /// Attach realised KPI values to an earlier decision.
    pub async fn record_outcome(
        &self,
        decision_id: &str,
        actuals: BTreeMap<String, f64>,
    ) -> Result<Vec<ScoredForecast>> {
        self.tracker().check_outcome(decision_id, &actuals)?;
        let scored_at = Utc::now();
        self.append(LedgerRecord::Outcome(quorum_ledger::OutcomeRecord {
            decision_id: decision_id.to_string(),
            actual_outcomes: actuals.clone(),
            scored_at,
        }))
        .await?;
        self.tracker().record_outcome(decision_id, actuals, scored_at)
    }
}
