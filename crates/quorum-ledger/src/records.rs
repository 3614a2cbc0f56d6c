//! Persisted record shapes.
//!
//! One [`LedgerEntry`] is written per append. The `record` field is tagged
//! with `kind` so a JSON-lines file can be filtered with plain text tools.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Identifier for one validation run. Ordering of entries is only
/// guaranteed within a single run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One encoding attempt: a batch of validations of a single variable under
/// a single encoder version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingAttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub variable: String,
    pub round: u32,
    pub plugin_version: String,
    /// Fraction (0.0–1.0) of validated cases where the encoder matched consensus.
    pub match_rate: f64,
    /// Mean reward signal over the validated cases, in [-1, 1].
    pub reward_signal: f64,
    pub issues: Vec<String>,
    pub duration_seconds: f64,
    /// Whether the attempt counted as a success for the selected arm.
    #[serde(default)]
    pub success: bool,
}

/// Point estimate plus 80% interval for one KPI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub point: f64,
    pub ci: [f64; 2],
}

/// A proposed improvement with its forecasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub suggested_change: String,
    pub target_layer: String,
    pub forecasts: BTreeMap<String, ForecastRecord>,
}

/// Realised KPI values for a previously recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub decision_id: String,
    pub actual_outcomes: BTreeMap<String, f64>,
    pub scored_at: DateTime<Utc>,
}

/// The payload of a single ledger append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerRecord {
    EncodingAttempt(EncodingAttemptRecord),
    Decision(DecisionRecord),
    Outcome(OutcomeRecord),
}

impl LedgerRecord {
    /// Stable snake_case name of the record kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerRecord::EncodingAttempt(_) => "encoding_attempt",
            LedgerRecord::Decision(_) => "decision",
            LedgerRecord::Outcome(_) => "outcome",
        }
    }
}

/// Envelope written for every append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub run_id: RunId,
    /// Monotonic sequence number within `run_id`, starting at 1.
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub record: LedgerRecord,
}

/// Tracks sequence numbers and decision lifecycle for a backend.
///
/// Both backends route every append through [`LedgerIndex::admit`] while
/// holding their write lock, so the checks and the write are one step.
#[derive(Debug, Default)]
pub(crate) struct LedgerIndex {
    next_seq: HashMap<RunId, u64>,
    /// decision id -> whether an outcome has been recorded
    decisions: HashMap<String, bool>,
}

impl LedgerIndex {
    /// Validate `record` against the lifecycle rules and return the seq it
    /// should be written with. Does not mutate; call [`LedgerIndex::commit`]
    /// once the write succeeded.
    pub(crate) fn admit(&self, run_id: &RunId, record: &LedgerRecord) -> LedgerResult<u64> {
        match record {
            LedgerRecord::Decision(d) if self.decisions.contains_key(&d.decision_id) => {
                return Err(LedgerError::DuplicateDecision {
                    decision_id: d.decision_id.clone(),
                });
            }
            LedgerRecord::Outcome(o) => match self.decisions.get(&o.decision_id) {
                None => {
                    return Err(LedgerError::DecisionNotFound {
                        decision_id: o.decision_id.clone(),
                    })
                }
                Some(true) => {
                    return Err(LedgerError::OutcomeAlreadyRecorded {
                        decision_id: o.decision_id.clone(),
                    })
                }
                Some(false) => {}
            },
            _ => {}
        }
        Ok(self.next_seq.get(run_id).copied().unwrap_or(1))
    }

    /// Record that `entry` has been durably written.
    pub(crate) fn commit(&mut self, entry: &LedgerEntry) {
        let next = self.next_seq.entry(entry.run_id.clone()).or_insert(1);
        *next = (*next).max(entry.seq + 1);
        match &entry.record {
            LedgerRecord::Decision(d) => {
                self.decisions.insert(d.decision_id.clone(), false);
            }
            LedgerRecord::Outcome(o) => {
                self.decisions.insert(o.decision_id.clone(), true);
            }
            LedgerRecord::EncodingAttempt(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(id: &str) -> LedgerRecord {
        LedgerRecord::Decision(DecisionRecord {
            decision_id: id.to_string(),
            suggested_change: "tighten phase-out guidance".to_string(),
            target_layer: "plugin".to_string(),
            forecasts: BTreeMap::from([(
                "match_rate".to_string(),
                ForecastRecord {
                    point: 5.0,
                    ci: [2.0, 8.0],
                },
            )]),
        })
    }

    fn outcome(id: &str) -> LedgerRecord {
        LedgerRecord::Outcome(OutcomeRecord {
            decision_id: id.to_string(),
            actual_outcomes: BTreeMap::from([("match_rate".to_string(), 4.0)]),
            scored_at: Utc::now(),
        })
    }

    fn entry(run: &RunId, seq: u64, record: LedgerRecord) -> LedgerEntry {
        LedgerEntry {
            run_id: run.clone(),
            seq,
            recorded_at: Utc::now(),
            record,
        }
    }

    #[test]
    fn record_is_tagged_with_kind() {
        let json = serde_json::to_value(decision("d1")).unwrap();
        assert_eq!(json["kind"], "decision");
        assert_eq!(json["forecasts"]["match_rate"]["ci"][1], 8.0);
    }

    #[test]
    fn kind_matches_serde_tag() {
        for record in [decision("d1"), outcome("d1")] {
            let json = serde_json::to_value(&record).unwrap();
            assert_eq!(json["kind"], record.kind());
        }
    }

    #[test]
    fn index_enforces_decision_lifecycle() {
        let run = RunId::new();
        let mut index = LedgerIndex::default();

        assert!(matches!(
            index.admit(&run, &outcome("d1")),
            Err(LedgerError::DecisionNotFound { .. })
        ));

        let seq = index.admit(&run, &decision("d1")).unwrap();
        assert_eq!(seq, 1);
        index.commit(&entry(&run, seq, decision("d1")));

        assert!(matches!(
            index.admit(&run, &decision("d1")),
            Err(LedgerError::DuplicateDecision { .. })
        ));

        let seq = index.admit(&run, &outcome("d1")).unwrap();
        assert_eq!(seq, 2);
        index.commit(&entry(&run, seq, outcome("d1")));

        assert!(matches!(
            index.admit(&run, &outcome("d1")),
            Err(LedgerError::OutcomeAlreadyRecorded { .. })
        ));
    }

    #[test]
    fn sequence_is_scoped_per_run() {
        let a = RunId("run-a".to_string());
        let b = RunId("run-b".to_string());
        let mut index = LedgerIndex::default();

        index.commit(&entry(&a, 1, decision("d1")));
        index.commit(&entry(&a, 2, decision("d2")));

        assert_eq!(index.admit(&a, &decision("d3")).unwrap(), 3);
        assert_eq!(index.admit(&b, &decision("d3")).unwrap(), 1);
    }
}
