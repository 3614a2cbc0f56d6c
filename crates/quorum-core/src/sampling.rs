//! Sampling controller: how much of a population to validate.
//!
//! The fraction steps down as the number of validated variables grows.
//! Subsets are chosen by ranking members on a seeded SHA-256 key, so the
//! same seed always picks the same subset.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{QuorumError, Result, TestCase};

/// Fraction applied while the validated count is at most `up_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingTier {
    /// Inclusive upper bound; `None` for the last, open-ended tier.
    pub up_to: Option<u64>,
    pub fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingSchedule {
    pub tiers: Vec<SamplingTier>,
}

impl Default for SamplingSchedule {
    fn default() -> Self {
        let tier = |up_to, fraction| SamplingTier { up_to, fraction };
        Self {
            tiers: vec![
                tier(Some(50), 1.0),
                tier(Some(200), 0.30),
                tier(Some(500), 0.10),
                tier(None, 0.05),
            ],
        }
    }
}

impl SamplingSchedule {
    pub fn check(&self) -> Result<()> {
        let invalid = |reason: String| Err(QuorumError::InvalidConfig(reason));
        let Some(last) = self.tiers.last() else {
            return invalid("sampling schedule has no tiers".to_string());
        };
        if last.up_to.is_some() {
            return invalid("last sampling tier must be open-ended".to_string());
        }
        let mut previous: Option<u64> = None;
        for tier in &self.tiers {
            if !(tier.fraction > 0.0 && tier.fraction <= 1.0) {
                return invalid(format!(
                    "sampling fraction must be within (0, 1], got {}",
                    tier.fraction
                ));
            }
            if let Some(bound) = tier.up_to {
                if previous.is_some_and(|p| bound <= p) {
                    return invalid("sampling tier bounds must increase".to_string());
                }
                previous = Some(bound);
            } else if !std::ptr::eq(tier, last) {
                return invalid("only the last sampling tier may be open-ended".to_string());
            }
        }
        Ok(())
    }

    /// Fraction for a given number of variables validated so far.
    pub fn sample_fraction(&self, validated_so_far: u64) -> f64 {
        self.tiers
            .iter()
            .find(|t| t.up_to.map_or(true, |bound| validated_so_far <= bound))
            .or(self.tiers.last())
            .map_or(1.0, |t| t.fraction)
    }
}

/// `ceil(fraction * population)`, at least one case for any positive
/// fraction of a non-empty population.
pub fn sample_size(fraction: f64, population: usize) -> usize {
    if population == 0 || fraction.is_nan() || fraction <= 0.0 {
        return 0;
    }
    // 0.3 * 10 is 3.0000000000000004 in binary floating point.
    let raw = (fraction * population as f64 - 1e-9).ceil();
    (raw.max(1.0) as usize).min(population)
}

/// Which variables to validate next, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePlan {
    pub selected: Vec<String>,
    pub fraction: f64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SamplingController {
    schedule: SamplingSchedule,
    seed: u64,
}

impl SamplingController {
    pub fn new(schedule: SamplingSchedule, seed: u64) -> Result<Self> {
        schedule.check()?;
        Ok(Self { schedule, seed })
    }

    pub fn schedule(&self) -> &SamplingSchedule {
        &self.schedule
    }

    pub fn sample_fraction(&self, validated_so_far: u64) -> f64 {
        self.schedule.sample_fraction(validated_so_far)
    }

    fn rank_key(&self, name: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(name.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Indices of the `k` members with the lowest seeded keys, in their
    /// original order.
    fn pick<'a>(&self, names: impl Iterator<Item = &'a str>, k: usize) -> Vec<usize> {
        let mut ranked: Vec<(String, usize)> = names
            .enumerate()
            .map(|(i, name)| (self.rank_key(name), i))
            .collect();
        ranked.sort();
        let mut picked: Vec<usize> = ranked.into_iter().take(k).map(|(_, i)| i).collect();
        picked.sort_unstable();
        picked
    }

    /// The cases of one variable to validate at this stage.
    pub fn select_cases<'a>(&self, cases: &'a [TestCase], validated_so_far: u64) -> Vec<&'a TestCase> {
        let k = sample_size(self.sample_fraction(validated_so_far), cases.len());
        self.pick(cases.iter().map(|c| c.name.as_str()), k)
            .into_iter()
            .map(|i| &cases[i])
            .collect()
    }

    /// Choose variables to validate: never-validated ones first, then a
    /// seeded subset of the rest.
    pub fn plan(
        &self,
        variables: &[String],
        tested: &BTreeSet<String>,
        validated_so_far: u64,
    ) -> SamplePlan {
        let fraction = self.sample_fraction(validated_so_far);
        let k = sample_size(fraction, variables.len());

        let (untested, seen): (Vec<&String>, Vec<&String>) =
            variables.iter().partition(|v| !tested.contains(*v));
        let mut selected: Vec<String> = untested.iter().take(k).map(|v| v.to_string()).collect();
        let remaining = k - selected.len();
        if remaining > 0 {
            selected.extend(
                self.pick(seen.iter().map(|v| v.as_str()), remaining)
                    .into_iter()
                    .map(|i| seen[i].clone()),
            );
        }

        let reason = if validated_so_far == 0 {
            "no validation history; full validation".to_string()
        } else if fraction >= 1.0 {
            format!("{validated_so_far} validated so far; full validation")
        } else {
            format!(
                "{validated_so_far} validated so far; sampling {:.0}% ({} untested first)",
                fraction * 100.0,
                untested.len().min(k)
            )
        };
        SamplePlan {
            selected,
            fraction,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_step_function() {
        let s = SamplingSchedule::default();
        assert_eq!(s.sample_fraction(0), 1.0);
        assert_eq!(s.sample_fraction(50), 1.0);
        assert_eq!(s.sample_fraction(51), 0.30);
        assert_eq!(s.sample_fraction(60), 0.30);
        assert_eq!(s.sample_fraction(200), 0.30);
        assert_eq!(s.sample_fraction(201), 0.10);
        assert_eq!(s.sample_fraction(500), 0.10);
        assert_eq!(s.sample_fraction(501), 0.05);
        assert_eq!(s.sample_fraction(1_000_000), 0.05);
    }

    #[test]
    fn test_sample_size_is_ceiling() {
        assert_eq!(sample_size(0.3, 10), 3);
        assert_eq!(sample_size(0.3, 11), 4);
        assert_eq!(sample_size(0.05, 1), 1);
        assert_eq!(sample_size(1.0, 0), 0);
        assert_eq!(sample_size(1.0, 7), 7);
        assert_eq!(sample_size(1e-12, 5), 1);
        assert_eq!(sample_size(0.0, 5), 0);
    }

    #[test]
    fn test_schedule_check() {
        assert!(SamplingSchedule::default().check().is_ok());
        assert!(SamplingSchedule { tiers: vec![] }.check().is_err());
        let closed = SamplingSchedule {
            tiers: vec![SamplingTier {
                up_to: Some(10),
                fraction: 1.0,
            }],
        };
        assert!(closed.check().is_err());
        let zero = SamplingSchedule {
            tiers: vec![SamplingTier {
                up_to: None,
                fraction: 0.0,
            }],
        };
        assert!(zero.check().is_err());
    }

    #[test]
    fn test_plan_prefers_untested() {
        let c = SamplingController::new(SamplingSchedule::default(), 3).unwrap();
        let vars: Vec<String> = (0..10).map(|i| format!("v{i}")).collect();
        let tested: BTreeSet<String> = vars.iter().filter(|v| *v != "v7").cloned().collect();
        let plan = c.plan(&vars, &tested, 100);
        assert_eq!(plan.fraction, 0.30);
        assert_eq!(plan.selected.len(), 3);
        assert_eq!(plan.selected[0], "v7");
    }
}
