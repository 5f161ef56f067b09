//! Append-only run journal.
//!
//! Events are stored as newline-delimited JSON (JSONL), one file for all
//! runs. Appends take an exclusive file lock so concurrent runs (and
//! concurrent processes) never interleave partial lines.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::domain::{DocumentRef, RunEvent, RunEventType};

/// File-based run journal using JSONL format
#[derive(Debug, Clone)]
pub struct RunJournal {
    path: PathBuf,
}

impl RunJournal {
    /// Open (or create) the journal at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create journal directory: {}", parent.display())
            })?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event to the journal
    pub fn append(&self, event: &RunEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        file.lock_exclusive()
            .context("Failed to acquire file lock on journal")?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        let written = writeln!(file, "{}", json)
            .and_then(|_| file.flush())
            .context("Failed to write event");

        file.unlock().context("Failed to release journal lock")?;
        written
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<RunEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: RunEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse journal line: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Events of one run, in order
    pub async fn run_events(&self, run_id: Uuid) -> Result<Vec<RunEvent>> {
        let events = self.replay().await?;
        Ok(events.into_iter().filter(|e| e.run_id == run_id).collect())
    }

    /// Most recent run-level outcome recorded for a document
    pub async fn last_outcome(&self, document: DocumentRef) -> Result<Option<RunEvent>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| {
            e.document == document
                && matches!(
                    e.event_type,
                    RunEventType::RunCompleted
                        | RunEventType::RunFailed
                        | RunEventType::RunSkipped
                        | RunEventType::RunCancelled
                )
        }))
    }
}
