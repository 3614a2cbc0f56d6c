use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::level::{classify, ClassifyParams, ConsensusLevel, Response};
use super::reward::{confidence_score, match_bonus, matches_expected, reward_signal};
use crate::adapter::{AdapterOutcome, ValidatorAdapter, WeightClass};
use crate::domain::{QuorumError, Result, TestCase, VariableRegistry};
use crate::metrics::METRICS;
use crate::obs;

/// Engine-wide consensus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Absolute dollar tolerance for agreement.
    pub tolerance: f64,
    /// Per-adapter query timeout, in milliseconds.
    pub adapter_timeout_ms: u64,
    /// Caller confidence must exceed this to flag an upstream bug.
    pub upstream_bug_confidence: f64,
    /// Log every per-validator result at debug level.
    pub detailed: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            tolerance: 15.0,
            adapter_timeout_ms: 30_000,
            upstream_bug_confidence: 0.90,
            detailed: false,
        }
    }
}

impl ConsensusConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn check(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(QuorumError::InvalidConfig(format!(
                "tolerance must be finite and non-negative, got {}",
                self.tolerance
            )));
        }
        if self.adapter_timeout_ms == 0 {
            return Err(QuorumError::InvalidConfig(
                "adapter timeout must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.upstream_bug_confidence) {
            return Err(QuorumError::InvalidConfig(format!(
                "upstream bug confidence must be within [0, 1], got {}",
                self.upstream_bug_confidence
            )));
        }
        Ok(())
    }
}

/// Why a validator produced no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Abstention {
    Unavailable { message: String },
    ComputationError { message: String },
    TimedOut { after_ms: u64 },
}

impl std::fmt::Display for Abstention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Abstention::Unavailable { message } => write!(f, "unavailable: {message}"),
            Abstention::ComputationError { message } => write!(f, "computation error: {message}"),
            Abstention::TimedOut { after_ms } => write!(f, "timed out after {after_ms}ms"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorOutcome {
    Value(f64),
    Abstained(Abstention),
}

/// One adapter's answer within a single validation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorResult {
    pub validator_id: String,
    pub weight_class: WeightClass,
    pub outcome: ValidatorOutcome,
    pub latency_ms: u64,
}

impl ValidatorResult {
    pub fn value(&self) -> Option<f64> {
        match self.outcome {
            ValidatorOutcome::Value(v) => Some(v),
            ValidatorOutcome::Abstained(_) => None,
        }
    }
}

/// A validator that disagrees with a high-confidence expected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialBug {
    pub validator_id: String,
    pub weight_class: WeightClass,
    pub test_case: String,
    pub variable: String,
    pub year: i32,
    pub citation: Option<String>,
    pub expected: f64,
    pub actual: f64,
    /// `actual - expected`.
    pub delta: f64,
    /// Caller confidence in the expected value.
    pub confidence: f64,
}

/// Outcome of one `validate()` call.
///
/// Carries no timings so that frozen adapter responses give identical
/// results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub test_case: String,
    pub variable: String,
    pub year: i32,
    pub level: ConsensusLevel,
    pub consensus_value: f64,
    pub expected: Option<f64>,
    pub tolerance: f64,
    pub reward_signal: f64,
    pub confidence: f64,
    pub matches_expected: std::collections::BTreeMap<String, bool>,
    pub responding: Vec<String>,
    pub abstained: Vec<String>,
    pub potential_bugs: Vec<PotentialBug>,
}

impl ConsensusResult {
    /// Fraction of validators with a defined match that matched, if any.
    pub fn match_rate(&self) -> Option<f64> {
        if self.matches_expected.is_empty() {
            return None;
        }
        let matched = self.matches_expected.values().filter(|m| **m).count();
        Some(matched as f64 / self.matches_expected.len() as f64)
    }
}

/// A result together with every validator's raw answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedValidation {
    pub result: ConsensusResult,
    pub validators: Vec<ValidatorResult>,
}

/// Fans a test case out to every configured adapter and classifies the
/// answers.
pub struct ConsensusEngine {
    adapters: Vec<Arc<dyn ValidatorAdapter>>,
    registry: VariableRegistry,
    config: ConsensusConfig,
}

impl ConsensusEngine {
    /// Adapters are ordered primary, reference, supplementary; the given
    /// order is kept within a class.
    pub fn new(
        mut adapters: Vec<Arc<dyn ValidatorAdapter>>,
        registry: VariableRegistry,
        config: ConsensusConfig,
    ) -> Result<Self> {
        config.check()?;
        let mut seen = std::collections::HashSet::new();
        for adapter in &adapters {
            if !seen.insert(adapter.id().to_string()) {
                return Err(QuorumError::InvalidConfig(format!(
                    "duplicate validator id: {}",
                    adapter.id()
                )));
            }
        }
        adapters.sort_by_key(|a| a.weight_class());
        Ok(Self {
            adapters,
            registry,
            config,
        })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub fn validator_ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.id()).collect()
    }

    pub async fn validate(
        &self,
        test_case: &TestCase,
        variable: &str,
        year: i32,
        confidence: f64,
    ) -> Result<ConsensusResult> {
        let (result, _) = self.run(test_case, variable, year, confidence, None).await?;
        Ok(result)
    }

    /// Like [`validate`](Self::validate) with a per-call tolerance.
    pub async fn validate_with_tolerance(
        &self,
        test_case: &TestCase,
        variable: &str,
        year: i32,
        confidence: f64,
        tolerance: f64,
    ) -> Result<ConsensusResult> {
        let (result, _) = self
            .run(test_case, variable, year, confidence, Some(tolerance))
            .await?;
        Ok(result)
    }

    pub async fn validate_detailed(
        &self,
        test_case: &TestCase,
        variable: &str,
        year: i32,
        confidence: f64,
    ) -> Result<DetailedValidation> {
        let (result, validators) = self.run(test_case, variable, year, confidence, None).await?;
        Ok(DetailedValidation { result, validators })
    }

    /// Validate several cases concurrently; results keep the input order.
    /// The first fatal error fails the batch.
    pub async fn batch_validate(
        &self,
        test_cases: &[TestCase],
        variable: &str,
        year: i32,
        confidence: f64,
    ) -> Result<Vec<ConsensusResult>> {
        try_join_all(
            test_cases
                .iter()
                .map(|tc| self.validate(tc, variable, year, confidence)),
        )
        .await
    }

    async fn run(
        &self,
        test_case: &TestCase,
        variable: &str,
        year: i32,
        confidence: f64,
        tolerance: Option<f64>,
    ) -> Result<(ConsensusResult, Vec<ValidatorResult>)> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(QuorumError::InvalidConfidence(confidence));
        }
        let mapping = self.registry.get(variable)?;
        mapping.check(&self.validator_ids())?;
        let tolerance = match tolerance {
            Some(t) if t.is_finite() && t >= 0.0 => t,
            Some(t) => {
                return Err(QuorumError::InvalidConfig(format!(
                    "tolerance must be finite and non-negative, got {t}"
                )))
            }
            None => mapping.tolerance.unwrap_or(self.config.tolerance),
        };

        let participants: Vec<&Arc<dyn ValidatorAdapter>> = self
            .adapters
            .iter()
            .filter(|a| mapping.allows(a.id()) && a.supports(variable))
            .collect();
        if participants.is_empty() {
            return Err(QuorumError::NoValidatorsAvailable {
                variable: variable.to_string(),
                abstained: 0,
            });
        }
        obs::emit_validation_started(&test_case.name, variable, year, participants.len());

        let timeout = self.config.adapter_timeout();
        let validators = join_all(
            participants
                .iter()
                .map(|adapter| query_one(adapter, variable, test_case, year, timeout)),
        )
        .await;

        let mut responses = Vec::with_capacity(validators.len());
        let mut abstained = Vec::new();
        for v in &validators {
            if self.config.detailed {
                debug!(
                    validator_id = %v.validator_id,
                    weight_class = %v.weight_class,
                    outcome = ?v.outcome,
                    latency_ms = v.latency_ms,
                    "validator result"
                );
            }
            match &v.outcome {
                ValidatorOutcome::Value(value) => responses.push(Response {
                    validator_id: v.validator_id.clone(),
                    weight_class: v.weight_class,
                    value: *value,
                }),
                ValidatorOutcome::Abstained(reason) => {
                    obs::emit_validator_abstained(&v.validator_id, variable, &reason.to_string());
                    METRICS.inc_abstentions();
                    abstained.push(v.validator_id.clone());
                }
            }
        }

        let expected = test_case.expected_for(variable);
        let params = ClassifyParams {
            expected,
            tolerance,
            confidence,
            upstream_bug_confidence: self.config.upstream_bug_confidence,
        };
        let Some((level, consensus_value)) = classify(&responses, params) else {
            return Err(QuorumError::NoValidatorsAvailable {
                variable: variable.to_string(),
                abstained: abstained.len(),
            });
        };

        let matches = matches_expected(&responses, expected, tolerance);
        let reward = reward_signal(level, match_bonus(&responses, &matches));
        let score = confidence_score(&responses, validators.len(), consensus_value, tolerance);

        let potential_bugs: Vec<PotentialBug> = match (level, expected) {
            (ConsensusLevel::PotentialUpstreamBug, Some(expected)) => responses
                .iter()
                .filter(|r| (r.value - expected).abs() > tolerance)
                .map(|r| PotentialBug {
                    validator_id: r.validator_id.clone(),
                    weight_class: r.weight_class,
                    test_case: test_case.name.clone(),
                    variable: variable.to_string(),
                    year,
                    citation: test_case.citation.clone(),
                    expected,
                    actual: r.value,
                    delta: r.value - expected,
                    confidence,
                })
                .collect(),
            _ => Vec::new(),
        };

        METRICS.inc_validations();
        METRICS.add_upstream_bugs(potential_bugs.len() as u64);
        obs::emit_consensus_reached(
            &test_case.name,
            variable,
            level.as_str(),
            reward,
            score,
            responses.len(),
        );

        let result = ConsensusResult {
            test_case: test_case.name.clone(),
            variable: variable.to_string(),
            year,
            level,
            consensus_value,
            expected,
            tolerance,
            reward_signal: reward,
            confidence: score,
            matches_expected: matches,
            responding: responses.into_iter().map(|r| r.validator_id).collect(),
            abstained,
            potential_bugs,
        };
        Ok((result, validators))
    }
}

async fn query_one(
    adapter: &Arc<dyn ValidatorAdapter>,
    variable: &str,
    test_case: &TestCase,
    year: i32,
    timeout: Duration,
) -> ValidatorResult {
    let started = Instant::now();
    let outcome =
        match tokio::time::timeout(timeout, adapter.query(variable, &test_case.inputs, year)).await
        {
            Ok(AdapterOutcome::Value(v)) if v.is_finite() => ValidatorOutcome::Value(v),
            Ok(AdapterOutcome::Value(v)) => {
                ValidatorOutcome::Abstained(Abstention::ComputationError {
                    message: format!("non-finite value {v}"),
                })
            }
            Ok(AdapterOutcome::Unavailable(message)) => {
                ValidatorOutcome::Abstained(Abstention::Unavailable { message })
            }
            Ok(AdapterOutcome::ComputationError(message)) => {
                ValidatorOutcome::Abstained(Abstention::ComputationError { message })
            }
            Err(_) => ValidatorOutcome::Abstained(Abstention::TimedOut {
                after_ms: timeout.as_millis() as u64,
            }),
        };
    ValidatorResult {
        validator_id: adapter.id().to_string(),
        weight_class: adapter.weight_class(),
        outcome,
        latency_ms: started.elapsed().as_millis() as u64,
    }
}
