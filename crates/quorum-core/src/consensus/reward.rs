//! Reward signal and confidence score.

use std::collections::BTreeMap;

use super::level::{ConsensusLevel, Response};
use crate::adapter::WeightClass;

const MATCH_STEP: f64 = 0.1;

/// Per-validator match against the expected value.
///
/// Empty when the test case carries no expected value for the variable:
/// an undefined match is neither a match nor a mismatch.
pub fn matches_expected(
    responses: &[Response],
    expected: Option<f64>,
    tolerance: f64,
) -> BTreeMap<String, bool> {
    let Some(expected) = expected else {
        return BTreeMap::new();
    };
    responses
        .iter()
        .map(|r| {
            (
                r.validator_id.clone(),
                (r.value - expected).abs() <= tolerance,
            )
        })
        .collect()
}

/// Weighted match contribution, normalised by the total weight of all
/// responders. Lies in `[-MATCH_STEP, MATCH_STEP]`.
pub fn match_bonus(responses: &[Response], matches: &BTreeMap<String, bool>) -> f64 {
    let total_weight: f64 = responses.iter().map(|r| r.weight_class.multiplier()).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = responses
        .iter()
        .filter_map(|r| {
            matches.get(&r.validator_id).map(|&matched| {
                let step = if matched { MATCH_STEP } else { -MATCH_STEP };
                r.weight_class.multiplier() * step
            })
        })
        .sum();
    weighted / total_weight
}

/// `bonus(level) + match_bonus`, clamped to `[-1, 1]`.
pub fn reward_signal(level: ConsensusLevel, match_bonus: f64) -> f64 {
    (level.bonus() + match_bonus).clamp(-1.0, 1.0)
}

/// How much the result can be trusted, in `[0, 1]`.
///
/// `0.3 * response_rate + 0.6 * agreement_rate + 0.1 * [primary responded]`.
pub fn confidence_score(
    responses: &[Response],
    queried: usize,
    consensus_value: f64,
    tolerance: f64,
) -> f64 {
    if queried == 0 || responses.is_empty() {
        return 0.0;
    }
    let response_rate = responses.len() as f64 / queried as f64;
    let agreeing = responses
        .iter()
        .filter(|r| (r.value - consensus_value).abs() <= tolerance)
        .count();
    let agreement_rate = agreeing as f64 / responses.len() as f64;
    let primary = responses
        .iter()
        .any(|r| r.weight_class == WeightClass::Primary);
    let score = 0.3 * response_rate + 0.6 * agreement_rate + if primary { 0.1 } else { 0.0 };
    score.min(1.0)
}
