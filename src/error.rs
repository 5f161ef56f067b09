//! Typed errors for the annotation engine.
//!
//! Per-candidate problems are not errors: they are folded into statistics as
//! [`DiscardReason`](crate::domain::DiscardReason)s. Everything here is either
//! recovered by the caller (a skipped tier, a failed batch item) or aborts the
//! operation that raised it.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::ApprovalStage;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition {
        from: ApprovalStage,
        to: ApprovalStage,
    },

    #[error("Version {version_number} already exists in group {group_id}")]
    ConcurrentVersionConflict { group_id: Uuid, version_number: u32 },

    #[error("Annotation {0} is not the current version of its group")]
    NotCurrent(i64),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{collaborator} unavailable: {reason}")]
    UpstreamUnavailable {
        collaborator: &'static str,
        reason: String,
    },

    #[error("Invalid span [{start}, {end})")]
    InvalidSpan { start: usize, end: usize },

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error("Review declined annotation {id}: {reason}")]
    ReviewDeclined { id: i64, reason: String },

    #[error("An actor id is required for this action")]
    MissingActor,

    #[error("Batch of {size} exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Run cancelled")]
    Cancelled,
}

impl AnnotationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether a retry with freshly read state can succeed.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentVersionConflict { .. })
    }
}

pub type Result<T, E = AnnotationError> = std::result::Result<T, E>;
