//! Consensus levels and the pure classification over validator responses.

use serde::{Deserialize, Serialize};

use crate::adapter::WeightClass;

/// How strongly the responding validators agree.
///
/// Variants are listed in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsensusLevel {
    FullAgreement,
    PrimaryConfirmed,
    MajorityAgreement,
    PotentialUpstreamBug,
    Disagreement,
}

impl ConsensusLevel {
    /// Fixed reward contribution of the level itself.
    pub fn bonus(self) -> f64 {
        match self {
            ConsensusLevel::FullAgreement => 0.5,
            ConsensusLevel::PrimaryConfirmed => 0.4,
            ConsensusLevel::MajorityAgreement => 0.2,
            ConsensusLevel::PotentialUpstreamBug => 0.1,
            ConsensusLevel::Disagreement => -0.2,
        }
    }

    /// Validators settled on one value at this level.
    pub fn is_agreement(self) -> bool {
        matches!(
            self,
            ConsensusLevel::FullAgreement
                | ConsensusLevel::PrimaryConfirmed
                | ConsensusLevel::MajorityAgreement
        )
    }

    /// Agreement strong enough that a mismatch is left undiagnosed.
    pub fn is_confirmed(self) -> bool {
        matches!(
            self,
            ConsensusLevel::FullAgreement | ConsensusLevel::PrimaryConfirmed
        )
    }

    /// Levels that always get a failure diagnosis.
    pub fn needs_diagnosis(self) -> bool {
        matches!(
            self,
            ConsensusLevel::Disagreement | ConsensusLevel::PotentialUpstreamBug
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConsensusLevel::FullAgreement => "FULL_AGREEMENT",
            ConsensusLevel::PrimaryConfirmed => "PRIMARY_CONFIRMED",
            ConsensusLevel::MajorityAgreement => "MAJORITY_AGREEMENT",
            ConsensusLevel::PotentialUpstreamBug => "POTENTIAL_UPSTREAM_BUG",
            ConsensusLevel::Disagreement => "DISAGREEMENT",
        }
    }
}

impl std::fmt::Display for ConsensusLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value returned by a validator that did not abstain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub validator_id: String,
    pub weight_class: WeightClass,
    pub value: f64,
}

/// Inputs to [`classify`] besides the responses themselves.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyParams {
    pub expected: Option<f64>,
    pub tolerance: f64,
    /// Caller belief that `expected` is correct.
    pub confidence: f64,
    /// `confidence` must exceed this for POTENTIAL_UPSTREAM_BUG.
    pub upstream_bug_confidence: f64,
}

fn agree(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Largest group of responses that all agree pairwise.
///
/// On a line, a pairwise-agreeing group is exactly a window of the sorted
/// values whose span is within tolerance. Ties keep the lowest window.
fn largest_agreeing_group(values: &[f64], tolerance: f64) -> &[f64] {
    let mut best = (0, 0);
    let mut start = 0;
    for end in 0..values.len() {
        while values[end] - values[start] > tolerance {
            start += 1;
        }
        if end + 1 - start > best.1 - best.0 {
            best = (start, end + 1);
        }
    }
    &values[best.0..best.1]
}

/// Assign a consensus level (first matching rule wins) and the value the
/// responders converge on.
///
/// Returns `None` when there are no responses; that case is an error for
/// the caller, not a level.
pub fn classify(responses: &[Response], params: ClassifyParams) -> Option<(ConsensusLevel, f64)> {
    if responses.is_empty() {
        return None;
    }
    let tol = params.tolerance;
    let n = responses.len();
    let overall_mean = mean(responses.iter().map(|r| r.value))?;

    let all_agree = n >= 2
        && responses
            .iter()
            .enumerate()
            .all(|(i, a)| responses[i + 1..].iter().all(|b| agree(a.value, b.value, tol)));
    if all_agree {
        return Some((ConsensusLevel::FullAgreement, overall_mean));
    }

    if let Some((pi, primary)) = responses
        .iter()
        .enumerate()
        .find(|(_, r)| r.weight_class == WeightClass::Primary)
    {
        let others = n - 1;
        let agreeing = responses
            .iter()
            .enumerate()
            .filter(|(i, r)| *i != pi && agree(r.value, primary.value, tol))
            .count();
        if others > 0 && agreeing * 2 > others {
            return Some((ConsensusLevel::PrimaryConfirmed, primary.value));
        }
    }

    let mut sorted: Vec<f64> = responses.iter().map(|r| r.value).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let group = largest_agreeing_group(&sorted, tol);
    if group.len() >= 2 && group.len() * 2 > n {
        let group_mean = mean(group.iter().copied())?;
        return Some((ConsensusLevel::MajorityAgreement, group_mean));
    }

    if let Some(expected) = params.expected {
        let any_disagrees = responses.iter().any(|r| !agree(r.value, expected, tol));
        if params.confidence > params.upstream_bug_confidence && any_disagrees {
            return Some((ConsensusLevel::PotentialUpstreamBug, expected));
        }
    }

    Some((ConsensusLevel::Disagreement, overall_mean))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: &str, class: WeightClass, value: f64) -> Response {
        Response {
            validator_id: id.to_string(),
            weight_class: class,
            value,
        }
    }

    fn params(expected: Option<f64>, confidence: f64) -> ClassifyParams {
        ClassifyParams {
            expected,
            tolerance: 15.0,
            confidence,
            upstream_bug_confidence: 0.90,
        }
    }

    #[test]
    fn test_full_agreement_without_expected() {
        let responses = vec![
            r("b", WeightClass::Primary, 100.50),
            r("a", WeightClass::Reference, 100.00),
        ];
        let (level, value) = classify(&responses, params(None, 0.0)).unwrap();
        assert_eq!(level, ConsensusLevel::FullAgreement);
        assert!((value - 100.25).abs() < 1e-9);
    }

    #[test]
    fn test_single_response_never_agrees_with_itself() {
        let responses = vec![r("pe", WeightClass::Reference, 100.0)];
        let (level, _) = classify(&responses, params(None, 0.0)).unwrap();
        assert_eq!(level, ConsensusLevel::Disagreement);
    }

    #[test]
    fn test_primary_confirmed_by_strict_majority_of_others() {
        let responses = vec![
            r("taxact", WeightClass::Primary, 1000.0),
            r("pe", WeightClass::Reference, 1005.0),
            r("taxsim", WeightClass::Reference, 1010.0),
            r("psl", WeightClass::Supplementary, 1500.0),
        ];
        let (level, value) = classify(&responses, params(None, 0.0)).unwrap();
        assert_eq!(level, ConsensusLevel::PrimaryConfirmed);
        assert_eq!(value, 1000.0);
    }

    #[test]
    fn test_primary_with_split_others_is_not_confirmed() {
        // Primary agrees with one of two others: not a strict majority.
        let responses = vec![
            r("taxact", WeightClass::Primary, 1000.0),
            r("pe", WeightClass::Reference, 1010.0),
            r("taxsim", WeightClass::Reference, 2000.0),
        ];
        let (level, _) = classify(&responses, params(None, 0.0)).unwrap();
        assert_ne!(level, ConsensusLevel::PrimaryConfirmed);
    }

    #[test]
    fn test_majority_agreement_without_primary() {
        let responses = vec![
            r("pe", WeightClass::Reference, 500.0),
            r("taxsim", WeightClass::Reference, 510.0),
            r("psl", WeightClass::Supplementary, 900.0),
        ];
        let (level, value) = classify(&responses, params(None, 0.0)).unwrap();
        assert_eq!(level, ConsensusLevel::MajorityAgreement);
        assert!((value - 505.0).abs() < 1e-9);
    }

    #[test]
    fn test_majority_requires_mutual_agreement() {
        // 0 and 20 both agree with 10 but not with each other.
        let responses = vec![
            r("a", WeightClass::Reference, 0.0),
            r("b", WeightClass::Reference, 10.0),
            r("c", WeightClass::Reference, 20.0),
            r("d", WeightClass::Reference, 500.0),
        ];
        let (level, _) = classify(&responses, params(None, 0.0)).unwrap();
        assert_eq!(level, ConsensusLevel::Disagreement);
    }

    #[test]
    fn test_upstream_bug_needs_confidence_above_threshold() {
        let responses = vec![
            r("pe", WeightClass::Reference, 100.0),
            r("taxsim", WeightClass::Reference, 400.0),
        ];
        let (low, _) = classify(&responses, params(Some(100.0), 0.90)).unwrap();
        assert_eq!(low, ConsensusLevel::Disagreement);

        let (high, value) = classify(&responses, params(Some(100.0), 0.95)).unwrap();
        assert_eq!(high, ConsensusLevel::PotentialUpstreamBug);
        assert_eq!(value, 100.0);
    }

    #[test]
    fn test_upstream_bug_needs_expected() {
        let responses = vec![
            r("pe", WeightClass::Reference, 100.0),
            r("taxsim", WeightClass::Reference, 400.0),
        ];
        let (level, _) = classify(&responses, params(None, 0.99)).unwrap();
        assert_eq!(level, ConsensusLevel::Disagreement);
    }

    #[test]
    fn test_no_responses() {
        assert!(classify(&[], params(None, 0.0)).is_none());
    }

    #[test]
    fn test_largest_group_prefers_lowest_window_on_tie() {
        let values = [0.0, 5.0, 100.0, 105.0];
        assert_eq!(largest_agreeing_group(&values, 10.0), &[0.0, 5.0]);
    }
}
