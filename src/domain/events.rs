//! Run journal events.
//!
//! Each orchestration run appends a short sequence of immutable events to the
//! journal so a run can be inspected after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::annotation::DocumentRef;

/// A single entry in the append-only run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Document being annotated
    pub document: DocumentRef,

    /// Tier name (for tier events)
    pub tier: Option<String>,

    /// Type of event
    pub event_type: RunEventType,

    /// Human-readable summary (counts only, never document text)
    pub payload_summary: String,

    /// Time taken in milliseconds
    pub duration_ms: Option<u64>,

    /// Error message if failed or skipped
    pub error: Option<String>,
}

impl RunEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        document: DocumentRef,
        tier: Option<String>,
        event_type: RunEventType,
        payload_summary: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            document,
            tier,
            event_type,
            payload_summary,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Types of events recorded during a generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    /// Generation started for a document
    RunStarted,

    /// Document already annotated and no refresh requested
    RunSkipped,

    /// A tier produced its candidates
    TierCompleted,

    /// A tier's reasoner call failed; the run continued without it
    TierSkipped,

    /// Accepted set persisted
    RunCompleted,

    /// Run aborted; previous annotations left untouched
    RunFailed,

    /// Cancelled between tiers
    RunCancelled,
}
