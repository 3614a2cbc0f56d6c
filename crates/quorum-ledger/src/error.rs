//! Error types for quorum-ledger

use thiserror::Error;

/// Errors that can occur in the event log layer
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Underlying file I/O failed
    #[error("ledger io failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded
    #[error("ledger serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted line could not be parsed back into an entry
    #[error("corrupt ledger line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    /// No decision record exists for the id
    #[error("decision not found: {decision_id}")]
    DecisionNotFound { decision_id: String },

    /// An outcome was already recorded for the decision
    #[error("outcome already recorded for decision {decision_id}")]
    OutcomeAlreadyRecorded { decision_id: String },

    /// A decision with the same id was already appended
    #[error("duplicate decision id: {decision_id}")]
    DuplicateDecision { decision_id: String },
}

/// Result type for event log operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_error_names_line() {
        let err = LedgerError::Corrupt {
            line: 7,
            reason: "expected value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn decision_errors_carry_id() {
        let err = LedgerError::DecisionNotFound {
            decision_id: "d-42".to_string(),
        };
        assert!(err.to_string().contains("d-42"));

        let err = LedgerError::OutcomeAlreadyRecorded {
            decision_id: "d-43".to_string(),
        };
        assert!(err.to_string().contains("already recorded"));
    }
}
