//! Storage trait for the append-only event log.
//!
//! Guarantees every backend must uphold:
//! - Each append writes exactly one complete [`LedgerEntry`].
//! - `seq` is monotonic within a run id; no ordering across runs.
//! - A decision id is appended at most once, and at most one outcome may
//!   follow it.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;

use crate::error::LedgerResult;
use crate::records::{LedgerEntry, LedgerRecord, RunId};

/// Append-only event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a record to `run_id`, returning the entry as written.
    async fn append(&self, run_id: &RunId, record: LedgerRecord) -> LedgerResult<LedgerEntry>;

    /// All entries of one run, ordered by `seq`.
    async fn read_run(&self, run_id: &RunId) -> LedgerResult<Vec<LedgerEntry>>;

    /// Every entry in append order.
    async fn read_all(&self) -> LedgerResult<Vec<LedgerEntry>>;
}
