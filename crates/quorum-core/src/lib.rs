//! Quorum Core Library
//!
//! Validates machine-generated tax computations against several independent
//! calculators and turns the answers into a learning signal:
//!
//! - `consensus`: fan-out to validator adapters, consensus level, reward
//! - `diagnosis`: which layer of the encoding stack caused a failure
//! - `bandit`: Thompson-sampling selection across encoder versions
//! - `sampling`: how much of a population to validate
//! - `calibration`: forecast-versus-outcome scoring of improvement decisions
//! - `validation_loop`: the round that ties them to the event log

pub mod adapter;
pub mod bandit;
pub mod calibration;
pub mod config;
pub mod consensus;
pub mod diagnosis;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod sampling;
pub mod telemetry;
pub mod validation_loop;

pub use adapter::{AdapterOutcome, FrozenAdapter, ValidatorAdapter, WeightClass};

pub use bandit::{
    detect_regressions, match_rates_by_version, Arm, BanditSelector, BanditStatistics,
    Regression, SelectionStrategy, DEFAULT_REGRESSION_THRESHOLD,
};

pub use calibration::{
    kpi, CalibrationConfig, CalibrationStatus, CalibrationSummary, CalibrationTracker, Forecast,
    ImprovementDecision, ScoredForecast,
};

pub use config::QuorumConfig;

pub use consensus::{
    file_issues, Abstention, ConsensusConfig, ConsensusEngine, ConsensusLevel, ConsensusResult,
    DetailedValidation, IssueDraft, PotentialBug, ValidatorOutcome, ValidatorResult,
};

pub use diagnosis::{
    DiagnosisClassifier, DiagnosisLayer, DiagnosisRule, EncodingEnvironment, FailureContext,
    FailureDiagnosis,
};

pub use domain::{QuorumError, Result, TestCase, VariableMapping, VariableRegistry};

pub use sampling::{sample_size, SamplePlan, SamplingController, SamplingSchedule, SamplingTier};

pub use telemetry::LogFormat;

pub use validation_loop::{CaseOutcome, Encoder, ValidationLoop, VariableRound};

pub use quorum_ledger::{EventLog, JsonlEventLog, LedgerEntry, LedgerRecord, RunId};
