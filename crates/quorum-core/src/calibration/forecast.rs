use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use quorum_ledger::{DecisionRecord, ForecastRecord, OutcomeRecord};
use serde::{Deserialize, Serialize};

use crate::diagnosis::DiagnosisLayer;
use crate::domain::{QuorumError, Result};

/// Standard KPI names.
pub mod kpi {
    pub const MATCH_RATE: &str = "match_rate";
    pub const ENCODING_SUCCESS_RATE: &str = "encoding_success_rate";
    pub const REGRESSION_RATE: &str = "regression_rate";
}

/// Point estimate with an 80% interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub point: f64,
    pub low: f64,
    pub high: f64,
}

impl Forecast {
    pub fn new(point: f64, low: f64, high: f64) -> Self {
        Self { point, low, high }
    }

    pub fn check(&self, kpi: &str) -> Result<()> {
        let invalid = |reason: &str| {
            Err(QuorumError::InvalidForecast {
                kpi: kpi.to_string(),
                reason: reason.to_string(),
            })
        };
        if !(self.point.is_finite() && self.low.is_finite() && self.high.is_finite()) {
            return invalid("values must be finite");
        }
        if self.low > self.high {
            return invalid("interval low exceeds high");
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, actual: f64) -> bool {
        self.low <= actual && actual <= self.high
    }

    pub fn score(&self, kpi: &str, actual: f64) -> ScoredForecast {
        ScoredForecast {
            kpi: kpi.to_string(),
            forecast: *self,
            actual,
            in_confidence_interval: self.contains(actual),
            forecast_error: actual - self.point,
        }
    }
}

impl From<ForecastRecord> for Forecast {
    fn from(r: ForecastRecord) -> Self {
        Self::new(r.point, r.ci[0], r.ci[1])
    }
}

impl From<Forecast> for ForecastRecord {
    fn from(f: Forecast) -> Self {
        ForecastRecord {
            point: f.point,
            ci: [f.low, f.high],
        }
    }
}

/// One forecast set against its realised value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredForecast {
    pub kpi: String,
    pub forecast: Forecast,
    pub actual: f64,
    pub in_confidence_interval: bool,
    /// `actual - point`.
    pub forecast_error: f64,
}

/// Realised values attached to a decision, exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub actuals: BTreeMap<String, f64>,
    pub scored_at: DateTime<Utc>,
    /// One entry per forecast KPI that has an actual.
    pub scores: Vec<ScoredForecast>,
}

/// A proposed change to the encoding stack with KPI forecasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementDecision {
    pub decision_id: String,
    pub suggested_change: String,
    pub target_layer: DiagnosisLayer,
    pub forecasts: BTreeMap<String, Forecast>,
    pub outcome: Option<DecisionOutcome>,
}

impl ImprovementDecision {
    pub fn new(
        decision_id: impl Into<String>,
        suggested_change: impl Into<String>,
        target_layer: DiagnosisLayer,
    ) -> Self {
        Self {
            decision_id: decision_id.into(),
            suggested_change: suggested_change.into(),
            target_layer,
            forecasts: BTreeMap::new(),
            outcome: None,
        }
    }

    pub fn with_forecast(mut self, kpi: impl Into<String>, forecast: Forecast) -> Self {
        self.forecasts.insert(kpi.into(), forecast);
        self
    }

    pub fn is_scored(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn check(&self) -> Result<()> {
        for (kpi, forecast) in &self.forecasts {
            forecast.check(kpi)?;
        }
        Ok(())
    }

    pub fn to_record(&self) -> DecisionRecord {
        DecisionRecord {
            decision_id: self.decision_id.clone(),
            suggested_change: self.suggested_change.clone(),
            target_layer: self.target_layer.as_str().to_string(),
            forecasts: self
                .forecasts
                .iter()
                .map(|(k, f)| (k.clone(), ForecastRecord::from(*f)))
                .collect(),
        }
    }

    pub fn from_record(record: &DecisionRecord) -> Result<Self> {
        let target_layer: DiagnosisLayer =
            serde_json::from_value(serde_json::Value::String(record.target_layer.clone()))?;
        Ok(Self {
            decision_id: record.decision_id.clone(),
            suggested_change: record.suggested_change.clone(),
            target_layer,
            forecasts: record
                .forecasts
                .iter()
                .map(|(k, f)| (k.clone(), Forecast::from(f.clone())))
                .collect(),
            outcome: None,
        })
    }

    /// Score every forecast that has an actual.
    pub(crate) fn score(&self, actuals: &BTreeMap<String, f64>) -> Vec<ScoredForecast> {
        self.forecasts
            .iter()
            .filter_map(|(kpi, f)| actuals.get(kpi).map(|&actual| f.score(kpi, actual)))
            .collect()
    }

    pub fn outcome_record(&self) -> Option<OutcomeRecord> {
        self.outcome.as_ref().map(|o| OutcomeRecord {
            decision_id: self.decision_id.clone(),
            actual_outcomes: o.actuals.clone(),
            scored_at: o.scored_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_check() {
        assert!(Forecast::new(0.9, 0.85, 0.95).check("match_rate").is_ok());
        assert!(Forecast::new(0.9, 0.95, 0.85).check("match_rate").is_err());
        assert!(Forecast::new(f64::NAN, 0.0, 1.0).check("match_rate").is_err());
    }

    #[test]
    fn test_score_bounds_inclusive() {
        let f = Forecast::new(0.9, 0.85, 0.95);
        assert!(f.score("m", 0.85).in_confidence_interval);
        assert!(f.score("m", 0.95).in_confidence_interval);
        let s = f.score("m", 0.80);
        assert!(!s.in_confidence_interval);
        assert!((s.forecast_error - -0.1).abs() < 1e-12);
    }

    #[test]
    fn test_record_conversion() {
        let d = ImprovementDecision::new("d1", "add phase-out guidance", DiagnosisLayer::Plugin)
            .with_forecast(kpi::MATCH_RATE, Forecast::new(0.9, 0.85, 0.95));
        let record = d.to_record();
        assert_eq!(record.target_layer, "plugin");
        assert_eq!(record.forecasts[kpi::MATCH_RATE].ci, [0.85, 0.95]);
        assert_eq!(ImprovementDecision::from_record(&record).unwrap(), d);
    }
}
