//! Structured lifecycle events.
//!
//! Every emission carries a stable `event = "..."` field so log pipelines
//! can key on it. [`RunSpan`] tags everything inside a validation round with
//! its `run_id`; use [`run_span`] with `Instrument` across `.await` points.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped span until dropped.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// Span tagged with `run_id`, for `Instrument::instrument`.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("quorum.run", run_id = %run_id)
}

pub fn emit_validation_started(test_case: &str, variable: &str, year: i32, validators: usize) {
    info!(
        event = "validation.started",
        test_case = %test_case,
        variable = %variable,
        year = year,
        validators = validators,
    );
}

/// An adapter produced no value; logged with the reason, never escalated.
pub fn emit_validator_abstained(validator_id: &str, variable: &str, reason: &str) {
    warn!(
        event = "validator.abstained",
        validator_id = %validator_id,
        variable = %variable,
        reason = %reason,
    );
}

pub fn emit_consensus_reached(
    test_case: &str,
    variable: &str,
    level: &str,
    reward_signal: f64,
    confidence: f64,
    responding: usize,
) {
    info!(
        event = "consensus.reached",
        test_case = %test_case,
        variable = %variable,
        level = %level,
        reward_signal = reward_signal,
        confidence = confidence,
        responding = responding,
    );
}

pub fn emit_diagnosis_assigned(variable: &str, layer: &str, confidence: f64, rule: &str) {
    info!(
        event = "diagnosis.assigned",
        variable = %variable,
        layer = %layer,
        confidence = confidence,
        rule = %rule,
    );
}

pub fn emit_bandit_selected(strategy: &str, arm_id: &str, arms: usize) {
    info!(event = "bandit.selected", strategy = %strategy, arm_id = %arm_id, arms = arms);
}

pub fn emit_bandit_outcome_recorded(arm_id: &str, success: bool, successes: u32, failures: u32) {
    info!(
        event = "bandit.outcome_recorded",
        arm_id = %arm_id,
        success = success,
        successes = successes,
        failures = failures,
    );
}

pub fn emit_calibration_scored(decision_id: &str, kpis: usize, in_interval: usize) {
    info!(
        event = "calibration.scored",
        decision_id = %decision_id,
        kpis = kpis,
        in_interval = in_interval,
    );
}

pub fn emit_ledger_appended(run_id: &str, kind: &str, seq: u64) {
    info!(event = "ledger.appended", run_id = %run_id, kind = %kind, seq = seq);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
    }
}
