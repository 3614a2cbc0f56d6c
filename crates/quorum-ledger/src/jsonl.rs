//! JSON-lines file backend for the event log.
//!
//! Layout: one [`LedgerEntry`] object per line, appended in write order.
//! Appends are serialised through an async mutex and each entry is written
//! with a single `write_all` of the full line, so concurrent appenders never
//! interleave partial records. A write that fails part way is cut back to
//! the previous length before the error is returned.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::event_log::EventLog;
use crate::records::{LedgerEntry, LedgerIndex, LedgerRecord, RunId};

/// Byte sink the writer appends lines to.
#[async_trait]
trait LineSink: Send {
    async fn len(&mut self) -> std::io::Result<u64>;
    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()>;
    async fn truncate(&mut self, len: u64) -> std::io::Result<()>;
}

#[async_trait]
impl LineSink for File {
    async fn len(&mut self) -> std::io::Result<u64> {
        Ok(self.metadata().await?.len())
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.write_all(line).await?;
        self.flush().await
    }

    async fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len).await
    }
}

/// Write one line, or leave the sink at its previous length.
async fn append_line(sink: &mut dyn LineSink, line: &[u8]) -> LedgerResult<()> {
    let before = sink.len().await?;
    if let Err(e) = sink.write_line(line).await {
        sink.truncate(before).await?;
        warn!(error = %e, "ledger write failed; partial line removed");
        return Err(e.into());
    }
    Ok(())
}

struct Writer {
    index: LedgerIndex,
    file: File,
}

/// File-backed append-only event log.
pub struct JsonlEventLog {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl JsonlEventLog {
    /// Open (or create) the log at `path`.
    ///
    /// Existing entries are scanned so per-run sequence numbers and the
    /// decision lifecycle resume where the previous process stopped.
    pub async fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut index = LedgerIndex::default();
        let existing = read_entries(&path).await?;
        for entry in &existing {
            index.commit(entry);
        }
        debug!(path = %path.display(), entries = existing.len(), "opened jsonl event log");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            writer: Mutex::new(Writer { index, file }),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn read_entries(path: &Path) -> LedgerResult<Vec<LedgerEntry>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    parse_lines(&content)
}

fn parse_lines(content: &str) -> LedgerResult<Vec<LedgerEntry>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| LedgerError::Corrupt {
                line: i + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, run_id: &RunId, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let mut writer = self.writer.lock().await;
        let seq = writer.index.admit(run_id, &record)?;
        let entry = LedgerEntry {
            run_id: run_id.clone(),
            seq,
            recorded_at: Utc::now(),
            record,
        };

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        append_line(&mut writer.file, &line).await?;
        writer.index.commit(&entry);

        debug!(run_id = %run_id, seq, kind = entry.record.kind(), "ledger entry written");
        Ok(entry)
    }

    async fn read_run(&self, run_id: &RunId) -> LedgerResult<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| &e.run_id == run_id)
            .collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries)
    }

    async fn read_all(&self) -> LedgerResult<Vec<LedgerEntry>> {
        // Hold the writer lock so a read never observes a half-written line.
        let _writer = self.writer.lock().await;
        read_entries(&self.path).await
    }
}
