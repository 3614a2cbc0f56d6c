//! Quorum-Ledger: append-only persistence for the validation loop
//!
//! Stores three record kinds, one JSON object per append:
//!
//! - encoding attempts (one batch of validations under an encoder version)
//! - improvement decisions with their KPI forecasts
//! - realised outcomes for earlier decisions
//!
//! ## Key Components
//!
//! - `EventLog`: backend-agnostic append / ordered-read trait
//! - `JsonlEventLog`: JSON-lines file backend
//! - `MemoryEventLog`: in-memory fake for tests

mod error;
pub mod event_log;
pub mod fakes;
pub mod jsonl;
pub mod records;

pub use error::{LedgerError, LedgerResult};
pub use event_log::EventLog;
pub use jsonl::JsonlEventLog;
pub use records::{
    DecisionRecord, EncodingAttemptRecord, ForecastRecord, LedgerEntry, LedgerRecord,
    OutcomeRecord, RunId,
};
