use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use quorum_ledger::{LedgerEntry, LedgerRecord};
use serde::{Deserialize, Serialize};

use super::forecast::{DecisionOutcome, ImprovementDecision, ScoredForecast};
use crate::domain::{QuorumError, Result};
use crate::obs;

/// Coverage band that counts as well calibrated for 80% intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub target_coverage: f64,
    pub band_low: f64,
    pub band_high: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            target_coverage: 0.80,
            band_low: 0.75,
            band_high: 0.85,
        }
    }
}

impl CalibrationConfig {
    pub fn check(&self) -> Result<()> {
        let ok = (0.0..=1.0).contains(&self.band_low)
            && (0.0..=1.0).contains(&self.band_high)
            && self.band_low <= self.target_coverage
            && self.target_coverage <= self.band_high;
        if ok {
            Ok(())
        } else {
            Err(QuorumError::InvalidConfig(format!(
                "calibration band must satisfy 0 <= low <= target <= high <= 1, got {} <= {} <= {}",
                self.band_low, self.target_coverage, self.band_high
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStatus {
    WellCalibrated,
    /// Intervals too narrow: coverage below the band.
    Overconfident,
    /// Intervals too wide: coverage above the band.
    Underconfident,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    /// `None` when aggregated across all KPIs.
    pub kpi: Option<String>,
    pub n_decisions: usize,
    pub n_forecasts: usize,
    /// Fraction of samples inside their interval: forecasts for one KPI,
    /// whole decisions across KPIs.
    pub coverage: f64,
    /// Mean signed error, `actual - point`.
    pub bias: f64,
    pub mean_absolute_error: f64,
    /// Mean interval width.
    pub mean_interval_width: f64,
    /// `coverage - target_coverage`.
    pub calibration_error: f64,
    pub status: CalibrationStatus,
}

/// Scores forecasted against realised KPI outcomes of improvement decisions.
///
/// Summaries are computed on read from the stored decisions.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTracker {
    config: CalibrationConfig,
    decisions: BTreeMap<String, ImprovementDecision>,
    /// Decision ids in recording order.
    order: Vec<String>,
}

impl CalibrationTracker {
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        config.check()?;
        Ok(Self {
            config,
            decisions: BTreeMap::new(),
            order: Vec::new(),
        })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Validate a decision without storing it.
    pub fn check_decision(&self, decision: &ImprovementDecision) -> Result<()> {
        if self.decisions.contains_key(&decision.decision_id) {
            return Err(QuorumError::DuplicateDecision(decision.decision_id.clone()));
        }
        decision.check()
    }

    pub fn record_decision(&mut self, mut decision: ImprovementDecision) -> Result<()> {
        self.check_decision(&decision)?;
        // Outcomes arrive through record_outcome only.
        decision.outcome = None;
        self.order.push(decision.decision_id.clone());
        self.decisions.insert(decision.decision_id.clone(), decision);
        Ok(())
    }

    /// Validate an outcome without storing it.
    pub fn check_outcome(&self, decision_id: &str, actuals: &BTreeMap<String, f64>) -> Result<()> {
        let decision = self
            .decisions
            .get(decision_id)
            .ok_or_else(|| QuorumError::DecisionNotFound(decision_id.to_string()))?;
        if decision.is_scored() {
            return Err(QuorumError::DecisionAlreadyScored(decision_id.to_string()));
        }
        if let Some((kpi, _)) = actuals.iter().find(|(_, v)| !v.is_finite()) {
            return Err(QuorumError::InvalidForecast {
                kpi: kpi.clone(),
                reason: "actual value must be finite".to_string(),
            });
        }
        Ok(())
    }

    /// Attach actuals to a decision. A decision is scored exactly once.
    pub fn record_outcome(
        &mut self,
        decision_id: &str,
        actuals: BTreeMap<String, f64>,
        scored_at: DateTime<Utc>,
    ) -> Result<Vec<ScoredForecast>> {
        self.check_outcome(decision_id, &actuals)?;
        let decision = self
            .decisions
            .get_mut(decision_id)
            .ok_or_else(|| QuorumError::DecisionNotFound(decision_id.to_string()))?;
        let scores = decision.score(&actuals);
        let in_interval = scores.iter().filter(|s| s.in_confidence_interval).count();
        obs::emit_calibration_scored(decision_id, scores.len(), in_interval);
        decision.outcome = Some(DecisionOutcome {
            actuals,
            scored_at,
            scores: scores.clone(),
        });
        Ok(scores)
    }

    pub fn decision(&self, decision_id: &str) -> Option<&ImprovementDecision> {
        self.decisions.get(decision_id)
    }

    /// Decisions in recording order.
    pub fn decisions(&self) -> impl Iterator<Item = &ImprovementDecision> {
        self.order.iter().filter_map(|id| self.decisions.get(id))
    }

    /// Calibration for one KPI, or across all KPIs when `kpi` is `None`.
    ///
    /// For one KPI every scored forecast is a sample. Across KPIs each
    /// scored decision is one sample: it is covered only when every scored
    /// KPI fell inside its interval, and its errors and width are the means
    /// over its own forecasts.
    pub fn summary(&self, kpi: Option<&str>) -> CalibrationSummary {
        // (covered, signed error, absolute error, width) per sample
        let mut samples: Vec<(bool, f64, f64, f64)> = Vec::new();
        let mut n_decisions = 0;
        let mut n_forecasts = 0;
        for decision in self.decisions() {
            let Some(outcome) = &decision.outcome else {
                continue;
            };
            let scores: Vec<&ScoredForecast> = outcome
                .scores
                .iter()
                .filter(|s| kpi.map_or(true, |k| s.kpi == k))
                .collect();
            if scores.is_empty() {
                continue;
            }
            n_decisions += 1;
            n_forecasts += scores.len();
            match kpi {
                Some(_) => samples.extend(scores.iter().map(|s| {
                    (
                        s.in_confidence_interval,
                        s.forecast_error,
                        s.forecast_error.abs(),
                        s.forecast.width(),
                    )
                })),
                None => {
                    let n = scores.len() as f64;
                    let mean = |f: &dyn Fn(&ScoredForecast) -> f64| {
                        scores.iter().map(|s| f(*s)).sum::<f64>() / n
                    };
                    samples.push((
                        scores.iter().all(|s| s.in_confidence_interval),
                        mean(&|s| s.forecast_error),
                        mean(&|s| s.forecast_error.abs()),
                        mean(&|s| s.forecast.width()),
                    ));
                }
            }
        }

        let kpi = kpi.map(str::to_string);
        if samples.is_empty() {
            return CalibrationSummary {
                kpi,
                n_decisions: 0,
                n_forecasts: 0,
                coverage: 0.0,
                bias: 0.0,
                mean_absolute_error: 0.0,
                mean_interval_width: 0.0,
                calibration_error: 0.0,
                status: CalibrationStatus::InsufficientData,
            };
        }

        let n = samples.len() as f64;
        let coverage = samples.iter().filter(|s| s.0).count() as f64 / n;
        let status = if coverage < self.config.band_low {
            CalibrationStatus::Overconfident
        } else if coverage > self.config.band_high {
            CalibrationStatus::Underconfident
        } else {
            CalibrationStatus::WellCalibrated
        };

        CalibrationSummary {
            kpi,
            n_decisions,
            n_forecasts,
            coverage,
            bias: samples.iter().map(|s| s.1).sum::<f64>() / n,
            mean_absolute_error: samples.iter().map(|s| s.2).sum::<f64>() / n,
            mean_interval_width: samples.iter().map(|s| s.3).sum::<f64>() / n,
            calibration_error: coverage - self.config.target_coverage,
            status,
        }
    }

    /// One summary per KPI that has at least one forecast.
    pub fn summary_by_kpi(&self) -> BTreeMap<String, CalibrationSummary> {
        let kpis: BTreeSet<&str> = self
            .decisions
            .values()
            .flat_map(|d| d.forecasts.keys().map(String::as_str))
            .collect();
        kpis.into_iter()
            .map(|k| (k.to_string(), self.summary(Some(k))))
            .collect()
    }

    /// Ledger records reproducing the tracker state, in recording order.
    pub fn records(&self) -> Vec<LedgerRecord> {
        let mut records: Vec<LedgerRecord> = self
            .decisions()
            .map(|d| LedgerRecord::Decision(d.to_record()))
            .collect();
        records.extend(
            self.decisions()
                .filter_map(|d| d.outcome_record().map(LedgerRecord::Outcome)),
        );
        records
    }

    /// Rebuild a tracker from decision and outcome records.
    pub fn replay<'a>(
        config: CalibrationConfig,
        entries: impl IntoIterator<Item = &'a LedgerEntry>,
    ) -> Result<Self> {
        let mut tracker = Self::new(config)?;
        for entry in entries {
            match &entry.record {
                LedgerRecord::Decision(record) => {
                    tracker.record_decision(ImprovementDecision::from_record(record)?)?;
                }
                LedgerRecord::Outcome(record) => {
                    tracker.record_outcome(
                        &record.decision_id,
                        record.actual_outcomes.clone(),
                        record.scored_at,
                    )?;
                }
                LedgerRecord::EncodingAttempt(_) => {}
            }
        }
        Ok(tracker)
    }
}
