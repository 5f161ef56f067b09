//! Version chain management.
//!
//! A logical annotation is a group of rows sharing a `group_id`. Changing it
//! means forking: the current row is copied, the copy gets the change and
//! the next version number, and the old row is superseded, all in one store
//! commit. Version numbers are computed here and validated by the store;
//! losing a race to another writer surfaces as a version conflict and the
//! fork is rebased onto the group's new current row.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    Annotation, AnnotationDraft, AnnotationId, AnnotationUpdate, ApprovalStage, Candidate,
    DocumentRef, ValidationStatus,
};
use crate::error::{AnnotationError, Result};
use crate::store::AnnotationStore;

pub const DEFAULT_MAX_VERSION_RETRIES: u32 = 3;

/// Version-1 draft for an accepted candidate
pub fn initial_draft(
    document: DocumentRef,
    context_id: &str,
    candidate: &Candidate,
    source_digest: &str,
) -> AnnotationDraft {
    AnnotationDraft {
        document,
        context_id: context_id.to_string(),
        span: candidate.span.clone(),
        concept: candidate.concept.clone(),
        confidence: candidate.confidence,
        model_id: candidate.model_id.clone(),
        rationale: candidate.rationale.clone(),
        source_digest: source_digest.to_string(),
        approval_stage: ApprovalStage::LlmExtracted,
        validation_status: ValidationStatus::Pending,
        version_number: 1,
        group_id: Uuid::new_v4(),
        parent_version_id: None,
        validated_at: None,
        validated_by: None,
        edit_payload: None,
        created_at: Utc::now(),
    }
}

/// Draft of the version after `current`, with `update` applied.
///
/// A stage that settles human validation also settles `validation_status`.
/// An actor, when given, is stamped as the validator.
pub fn next_draft(
    current: &Annotation,
    update: &AnnotationUpdate,
    stage: ApprovalStage,
    actor: Option<&str>,
) -> AnnotationDraft {
    let mut draft = current.to_draft();
    update.apply_to(&mut draft);
    if !update.is_empty() {
        draft.edit_payload = Some(update.clone());
    }

    draft.approval_stage = stage;
    match stage {
        ApprovalStage::UserApproved => draft.validation_status = ValidationStatus::Approved,
        ApprovalStage::UserRejected => draft.validation_status = ValidationStatus::Rejected,
        ApprovalStage::LlmExtracted | ApprovalStage::LlmApproved => {}
    }

    if let Some(actor) = actor {
        draft.validated_by = Some(actor.to_string());
        draft.validated_at = Some(draft.created_at);
    }
    draft
}

/// Creates, forks and reads annotation version chains
#[derive(Clone)]
pub struct VersionChain {
    store: Arc<dyn AnnotationStore>,
    max_retries: u32,
}

impl VersionChain {
    pub fn new(store: Arc<dyn AnnotationStore>) -> Self {
        Self {
            store,
            max_retries: DEFAULT_MAX_VERSION_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn store(&self) -> &Arc<dyn AnnotationStore> {
        &self.store
    }

    /// Persist a candidate as version 1 of a new group
    pub fn create_initial(
        &self,
        document: DocumentRef,
        context_id: &str,
        candidate: &Candidate,
        source_digest: &str,
    ) -> Result<Annotation> {
        let annotation = self
            .store
            .insert_initial(initial_draft(document, context_id, candidate, source_digest))?;
        debug!(group_id = %annotation.group_id, id = %annotation.id, "Created annotation");
        Ok(annotation)
    }

    /// Fork the current row `existing_id` into a new version carrying
    /// `update` at `stage`.
    pub fn create_new_version(
        &self,
        existing_id: AnnotationId,
        update: &AnnotationUpdate,
        stage: ApprovalStage,
        actor: Option<&str>,
    ) -> Result<Annotation> {
        update.validate()?;
        self.fork_with(existing_id, |current| {
            Ok(next_draft(current, update, stage, actor))
        })
    }

    /// Fork with a caller-built draft.
    ///
    /// `prepare` receives the row being forked. On a version conflict it is
    /// called again with the group's new current row, so any checks it makes
    /// are re-run against fresh state.
    #[instrument(skip(self, prepare), fields(id = %existing_id))]
    pub fn fork_with<F>(&self, existing_id: AnnotationId, prepare: F) -> Result<Annotation>
    where
        F: Fn(&Annotation) -> Result<AnnotationDraft>,
    {
        let mut base = self.store.get(existing_id)?;
        if !base.is_current {
            return Err(AnnotationError::NotCurrent(existing_id.0));
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let mut draft = prepare(&base)?;
            draft.group_id = base.group_id;
            draft.version_number = self.store.max_version(base.group_id)?.unwrap_or(0) + 1;
            let version = draft.version_number;

            match self.store.commit_version(draft) {
                Ok(annotation) => {
                    info!(
                        group_id = %annotation.group_id,
                        version = annotation.version_number,
                        stage = %annotation.approval_stage,
                        "Forked annotation version"
                    );
                    return Ok(annotation);
                }
                Err(e) if e.is_version_conflict() && attempt <= self.max_retries => {
                    warn!(
                        group_id = %base.group_id,
                        version,
                        attempt,
                        "Version taken by a concurrent writer, rebasing"
                    );
                    base = self.current_of_group(base.group_id)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Mark `old` superseded by `new` (same group, next version)
    pub fn supersede(&self, old: AnnotationId, new: AnnotationId) -> Result<()> {
        self.store.supersede(old, new)
    }

    /// All versions of a group, newest first
    pub fn get_history(&self, group_id: Uuid) -> Result<Vec<Annotation>> {
        self.store.group_history(group_id)
    }

    /// History of the group `annotation_id` belongs to
    pub fn history_for(&self, annotation_id: AnnotationId) -> Result<Vec<Annotation>> {
        let annotation = self.store.get(annotation_id)?;
        self.get_history(annotation.group_id)
    }

    pub fn current_of_group(&self, group_id: Uuid) -> Result<Annotation> {
        self.get_history(group_id)?
            .into_iter()
            .find(|row| row.is_current)
            .ok_or_else(|| AnnotationError::not_found("current version of group", group_id))
    }

    pub fn current_for_document(&self, document: DocumentRef) -> Result<Vec<Annotation>> {
        self.store.current_for_document(document)
    }

    /// Delete every version of every annotation of a document
    pub fn clear_document(&self, document: DocumentRef) -> Result<usize> {
        let removed = self.store.clear_document(document)?;
        info!(document = %document, removed, "Cleared document annotations");
        Ok(removed)
    }
}
