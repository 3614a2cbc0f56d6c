use std::sync::{Arc, Mutex, PoisonError, RwLock};

use quorum_ledger::{LedgerEntry, LedgerRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use super::arm::{Arm, ArmState};
use crate::domain::{QuorumError, Result};
use crate::metrics::METRICS;
use crate::obs;

/// How [`BanditSelector::select`] picks an arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// One Beta(s + 1, f + 1) draw per arm; the largest draw wins.
    #[default]
    Thompson,
    /// Highest empirical success rate.
    Exploit,
    /// Uniformly random arm.
    Explore,
    /// Most recently registered arm.
    Latest,
}

impl SelectionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionStrategy::Thompson => "thompson",
            SelectionStrategy::Exploit => "exploit",
            SelectionStrategy::Explore => "explore",
            SelectionStrategy::Latest => "latest",
        }
    }
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SelectionStrategy {
    type Err = QuorumError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thompson" => Ok(SelectionStrategy::Thompson),
            "exploit" | "greedy" => Ok(SelectionStrategy::Exploit),
            "explore" | "random" => Ok(SelectionStrategy::Explore),
            "latest" | "newest" => Ok(SelectionStrategy::Latest),
            other => Err(QuorumError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Aggregate view over all arms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditStatistics {
    pub arms: usize,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub overall_success_rate: f64,
    /// Exploit choice, if any arm exists.
    pub best: Option<Arm>,
}

/// Thompson-sampling selector over encoder versions.
///
/// The arm table only takes a write lock to register arms; outcomes update
/// a single arm's atomic counters under the shared read lock, so workers
/// recording on different arms never contend.
pub struct BanditSelector {
    arms: RwLock<Vec<Arc<ArmState>>>,
    rng: Mutex<StdRng>,
}

impl Default for BanditSelector {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl BanditSelector {
    /// Selector seeded from OS entropy.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Reproducible selector.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            arms: RwLock::new(Vec::new()),
            rng: Mutex::new(rng),
        }
    }

    fn table(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<ArmState>>> {
        self.arms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn find(&self, id: &str) -> Option<Arc<ArmState>> {
        self.table().iter().find(|a| a.id == id).cloned()
    }

    pub fn register_arm(&self, id: impl Into<String>) -> Result<Arm> {
        let id = id.into();
        let mut arms = self.arms.write().unwrap_or_else(PoisonError::into_inner);
        if arms.iter().any(|a| a.id == id) {
            return Err(QuorumError::DuplicateArm(id));
        }
        let state = Arc::new(ArmState::new(id));
        let snapshot = state.snapshot();
        arms.push(state);
        tracing::debug!(arm_id = %snapshot.id, "arm registered");
        Ok(snapshot)
    }

    /// Register `id` unless it already exists.
    pub fn ensure_arm(&self, id: &str) -> Arm {
        if let Some(arm) = self.find(id) {
            return arm.snapshot();
        }
        match self.register_arm(id) {
            Ok(arm) => arm,
            // Lost a race with another registration.
            Err(_) => self
                .find(id)
                .map(|a| a.snapshot())
                .unwrap_or_else(|| ArmState::new(id).snapshot()),
        }
    }

    /// Snapshot of every arm in registration order.
    pub fn arms(&self) -> Vec<Arm> {
        self.table().iter().map(|a| a.snapshot()).collect()
    }

    pub fn arm(&self, id: &str) -> Option<Arm> {
        self.find(id).map(|a| a.snapshot())
    }

    pub fn select(&self, strategy: SelectionStrategy) -> Result<String> {
        let arms = self.arms();
        if arms.is_empty() {
            return Err(QuorumError::NoArms);
        }

        let index = match strategy {
            SelectionStrategy::Thompson => {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                let mut best = 0;
                let mut best_sample = f64::NEG_INFINITY;
                for (i, arm) in arms.iter().enumerate() {
                    let alpha = f64::from(arm.successes) + 1.0;
                    let beta = f64::from(arm.failures) + 1.0;
                    let sample = match Beta::new(alpha, beta) {
                        Ok(dist) => dist.sample(&mut *rng),
                        Err(_) => alpha / (alpha + beta),
                    };
                    // Strict: the earlier arm keeps a tie.
                    if sample > best_sample {
                        best_sample = sample;
                        best = i;
                    }
                }
                best
            }
            SelectionStrategy::Exploit => best_index(&arms),
            SelectionStrategy::Explore => {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                rng.gen_range(0..arms.len())
            }
            SelectionStrategy::Latest => arms.len() - 1,
        };

        let chosen = arms[index].id.clone();
        obs::emit_bandit_selected(strategy.as_str(), &chosen, arms.len());
        Ok(chosen)
    }

    /// Route one completed outcome to `id`. Exactly one counter moves.
    pub fn record_outcome(&self, id: &str, success: bool) -> Result<Arm> {
        let state = self
            .find(id)
            .ok_or_else(|| QuorumError::UnknownArm(id.to_string()))?;
        let (successes, failures) = state
            .record(success)
            .ok_or_else(|| QuorumError::ArmCounterFull(id.to_string()))?;
        METRICS.inc_outcomes_recorded();
        obs::emit_bandit_outcome_recorded(id, success, successes, failures);
        Ok(Arm {
            id: id.to_string(),
            successes,
            failures,
        })
    }

    pub fn statistics(&self) -> BanditStatistics {
        let arms = self.arms();
        let total_attempts: u64 = arms.iter().map(Arm::attempts).sum();
        let total_successes: u64 = arms.iter().map(|a| u64::from(a.successes)).sum();
        let overall_success_rate = if total_attempts == 0 {
            0.0
        } else {
            total_successes as f64 / total_attempts as f64
        };
        let best = (!arms.is_empty()).then(|| arms[best_index(&arms)].clone());
        BanditStatistics {
            arms: arms.len(),
            total_attempts,
            total_successes,
            overall_success_rate,
            best,
        }
    }

    /// Rebuild arm counters from encoding-attempt records. Returns the
    /// number of outcomes applied.
    pub fn replay<'a>(&self, entries: impl IntoIterator<Item = &'a LedgerEntry>) -> usize {
        let mut applied = 0;
        for entry in entries {
            if let LedgerRecord::EncodingAttempt(attempt) = &entry.record {
                self.ensure_arm(&attempt.plugin_version);
                let Some(state) = self.find(&attempt.plugin_version) else {
                    continue;
                };
                if state.record(attempt.success).is_some() {
                    applied += 1;
                } else {
                    tracing::warn!(arm = %state.id, "arm counter full; outcome not replayed");
                }
            }
        }
        tracing::debug!(applied, "bandit replayed from ledger");
        applied
    }
}

/// Highest success rate; ties go to more attempts, then the earlier arm.
fn best_index(arms: &[Arm]) -> usize {
    let mut best = 0;
    for (i, arm) in arms.iter().enumerate().skip(1) {
        let current = &arms[best];
        let better = match arm.success_rate().total_cmp(&current.success_rate()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => arm.attempts() > current.attempts(),
        };
        if better {
            best = i;
        }
    }
    best
}
