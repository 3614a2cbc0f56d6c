//! In-memory fake for the event log (testing only)
//!
//! Provides `MemoryEventLog`, which satisfies the [`EventLog`] contract
//! without touching the filesystem.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::LedgerResult;
use crate::event_log::EventLog;
use crate::records::{LedgerEntry, LedgerIndex, LedgerRecord, RunId};

#[derive(Debug, Default)]
struct State {
    index: LedgerIndex,
    entries: Vec<LedgerEntry>,
}

/// In-memory event log backed by a `Vec<LedgerEntry>`.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    state: Mutex<State>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, run_id: &RunId, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let mut state = self.lock();
        let seq = state.index.admit(run_id, &record)?;
        let entry = LedgerEntry {
            run_id: run_id.clone(),
            seq,
            recorded_at: Utc::now(),
            record,
        };
        state.index.commit(&entry);
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn read_run(&self, run_id: &RunId) -> LedgerResult<Vec<LedgerEntry>> {
        let state = self.lock();
        let mut entries: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| &e.run_id == run_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    async fn read_all(&self) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.lock().entries.clone())
    }
}
