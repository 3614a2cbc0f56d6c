//! Domain-level error taxonomy for quorum.
//!
//! Only call-level failures live here. A validator that abstains is a value
//! (`AdapterOutcome`), and a disagreement is a valid consensus level.

use quorum_ledger::LedgerError;

/// Quorum domain errors.
#[derive(Debug, thiserror::Error)]
pub enum QuorumError {
    #[error("unknown variable: no mapping configured for {0}")]
    UnknownVariable(String),

    #[error("malformed mapping for {variable}: {reason}")]
    MalformedMapping { variable: String, reason: String },

    #[error("no validators available for {variable}: {abstained} abstained")]
    NoValidatorsAvailable { variable: String, abstained: usize },

    #[error("confidence must be within [0, 1], got {0}")]
    InvalidConfidence(f64),

    #[error("invalid forecast for {kpi}: {reason}")]
    InvalidForecast { kpi: String, reason: String },

    #[error("no arms registered")]
    NoArms,

    #[error("unknown arm: {0}")]
    UnknownArm(String),

    #[error("arm counter full: {0} cannot record more outcomes")]
    ArmCounterFull(String),

    #[error("arm already registered: {0}")]
    DuplicateArm(String),

    #[error("unknown selection strategy: {0}")]
    UnknownStrategy(String),

    #[error("decision not found: {0}")]
    DecisionNotFound(String),

    #[error("decision already scored: {0}")]
    DecisionAlreadyScored(String),

    #[error("duplicate decision id: {0}")]
    DuplicateDecision(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuorumError {
    /// Configuration errors abort before any validator is queried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            QuorumError::UnknownVariable(_)
                | QuorumError::MalformedMapping { .. }
                | QuorumError::InvalidConfig(_)
        )
    }
}

/// Result type for quorum domain operations.
pub type Result<T> = std::result::Result<T, QuorumError>;
