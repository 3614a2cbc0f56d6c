//! Calibration of improvement forecasts against realised outcomes.

mod forecast;
mod tracker;

pub use forecast::{kpi, DecisionOutcome, Forecast, ImprovementDecision, ScoredForecast};
pub use tracker::{CalibrationConfig, CalibrationStatus, CalibrationSummary, CalibrationTracker};
