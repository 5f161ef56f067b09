//! Persistence boundary for annotation rows.
//!
//! Two backends implement [`AnnotationStore`]:
//! - [`MemoryStore`]: an arena of rows indexed by id, groups own an ordered
//!   list of version ids. Used in tests and for dry runs.
//! - [`SqliteStore`]: durable storage with per-operation transactions.
//!
//! Every write method is atomic: it either applies completely or leaves the
//! store untouched. Writes that extend a group are serialized, and a version
//! number that is already taken is reported as
//! [`AnnotationError::ConcurrentVersionConflict`] so the caller can recompute.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    Annotation, AnnotationDraft, AnnotationId, ApprovalStage, DocumentRef, ValidationStatus,
};
use crate::error::{AnnotationError, Result};

#[cfg(test)]
pub(crate) mod contract;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// In-place review stamp (rejection does not fork a version)
#[derive(Debug, Clone)]
pub struct ReviewStamp {
    pub approval_stage: ApprovalStage,
    pub validation_status: ValidationStatus,
    pub validated_by: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
}

/// When `replace_document` may retire an existing current set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacePolicy {
    /// Retire whatever is current (force refresh)
    Always,
    /// Write only if the document has no current rows; otherwise keep them
    IfUnannotated,
}

/// Outcome of replacing a document's current annotation set
#[derive(Debug, Clone, Default)]
pub struct DocumentReplacement {
    /// Previously current rows, now non-current
    pub retired: Vec<AnnotationId>,
    /// Fresh version-1 rows
    pub inserted: Vec<Annotation>,
    /// Current rows left in place under `IfUnannotated`; nothing was written
    pub kept: Vec<Annotation>,
}

impl DocumentReplacement {
    pub fn was_skipped(&self) -> bool {
        !self.kept.is_empty()
    }
}

/// Aggregate counts over stored annotations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationStatistics {
    /// All rows, every version
    pub total_versions: usize,
    /// Rows with is_current = true
    pub current: usize,
    /// Distinct groups
    pub groups: usize,
    /// Distinct documents with at least one row
    pub documents: usize,
    /// Current rows per approval stage
    pub by_stage: BTreeMap<ApprovalStage, usize>,
    /// Current rows per validation status
    pub by_status: BTreeMap<ValidationStatus, usize>,
    /// Mean confidence of current rows
    pub mean_confidence: Option<f64>,
}

impl AnnotationStatistics {
    /// Build from a slice of rows (used by the in-memory backend and tests)
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a Annotation>) -> Self {
        let mut stats = Self::default();
        let mut groups = std::collections::HashSet::new();
        let mut documents = std::collections::HashSet::new();
        let mut confidence_sum = 0.0;

        for row in rows {
            stats.total_versions += 1;
            groups.insert(row.group_id);
            documents.insert(row.document);

            if row.is_current {
                stats.current += 1;
                confidence_sum += row.confidence;
                *stats.by_stage.entry(row.approval_stage).or_insert(0) += 1;
                *stats.by_status.entry(row.validation_status).or_insert(0) += 1;
            }
        }

        stats.groups = groups.len();
        stats.documents = documents.len();
        if stats.current > 0 {
            stats.mean_confidence = Some(confidence_sum / stats.current as f64);
        }
        stats
    }
}

/// Version numbers in a group are dense: a commit must use exactly max + 1.
/// Anything lower was taken by another writer in the meantime.
pub(crate) fn check_next_version(group_id: Uuid, proposed: u32, expected: u32) -> Result<()> {
    if proposed < expected {
        return Err(AnnotationError::ConcurrentVersionConflict {
            group_id,
            version_number: proposed,
        });
    }
    if proposed > expected {
        return Err(AnnotationError::Persistence(format!(
            "version {} would leave a gap in group {} (next is {})",
            proposed, group_id, expected
        )));
    }
    Ok(())
}

/// Stage check shared by the `stamp_review` implementations
pub(crate) fn check_stamp(row: &Annotation, stamp: &ReviewStamp) -> Result<()> {
    if !row.is_current {
        return Err(AnnotationError::NotCurrent(row.id.0));
    }
    if !row.approval_stage.can_transition_to(stamp.approval_stage) {
        return Err(AnnotationError::InvalidTransition {
            from: row.approval_stage,
            to: stamp.approval_stage,
        });
    }
    Ok(())
}

/// CRUD over annotation rows, keyed by document and by (group, version)
pub trait AnnotationStore: Send + Sync {
    /// Fetch one row by id
    fn get(&self, id: AnnotationId) -> Result<Annotation>;

    /// Insert a version-1 row as the current row of a new group
    fn insert_initial(&self, draft: AnnotationDraft) -> Result<Annotation>;

    /// Insert `draft` as the current row of its group and supersede the
    /// group's previously current row, in one atomic step.
    ///
    /// Fails with `ConcurrentVersionConflict` if `draft.version_number` is
    /// already taken in the group.
    fn commit_version(&self, draft: AnnotationDraft) -> Result<Annotation>;

    /// Mark `old` non-current with a forward pointer to `new`
    fn supersede(&self, old: AnnotationId, new: AnnotationId) -> Result<()>;

    /// Highest version number in a group
    fn max_version(&self, group_id: Uuid) -> Result<Option<u32>>;

    /// All versions in a group, newest first
    fn group_history(&self, group_id: Uuid) -> Result<Vec<Annotation>>;

    /// Current rows for a document, in text order
    fn current_for_document(&self, document: DocumentRef) -> Result<Vec<Annotation>>;

    /// Retire every current row of the document and insert `drafts` as new
    /// groups, atomically. Under `IfUnannotated` the emptiness check happens
    /// inside the same atomic step, so two racing runs cannot both write.
    fn replace_document(
        &self,
        document: DocumentRef,
        drafts: Vec<AnnotationDraft>,
        policy: ReplacePolicy,
    ) -> Result<DocumentReplacement>;

    /// Apply a review stamp to a current row in place. The row's stage must
    /// allow the transition to `stamp.approval_stage` at write time.
    fn stamp_review(&self, id: AnnotationId, stamp: ReviewStamp) -> Result<Annotation>;

    /// Delete every version of every annotation of a document
    fn clear_document(&self, document: DocumentRef) -> Result<usize>;

    /// Aggregate counts, optionally limited to one context
    fn statistics(&self, context_id: Option<&str>) -> Result<AnnotationStatistics>;
}
