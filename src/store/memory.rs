//! In-memory arena backend.
//!
//! Rows live in one map keyed by id; a group owns the ordered list of its
//! version ids and a document owns the list of its groups. Versions refer to
//! each other only by id. A single mutex serializes every operation, which
//! also serializes writers racing on the same group.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::{
    check_next_version, check_stamp, AnnotationStatistics, AnnotationStore, DocumentReplacement,
    ReplacePolicy, ReviewStamp,
};
use crate::domain::{Annotation, AnnotationDraft, AnnotationId, DocumentRef};
use crate::error::{AnnotationError, Result};

#[derive(Debug, Default)]
struct Arena {
    next_id: i64,
    rows: HashMap<AnnotationId, Annotation>,
    /// group -> version ids, ascending by version number
    groups: HashMap<Uuid, Vec<AnnotationId>>,
    /// document -> groups, in creation order
    documents: HashMap<DocumentRef, Vec<Uuid>>,
}

impl Arena {
    fn allocate(&mut self) -> AnnotationId {
        self.next_id += 1;
        AnnotationId(self.next_id)
    }

    fn row(&self, id: AnnotationId) -> Result<&Annotation> {
        self.rows
            .get(&id)
            .ok_or_else(|| AnnotationError::not_found("annotation", id))
    }

    fn current_of(&self, group_id: Uuid) -> Option<&Annotation> {
        self.groups
            .get(&group_id)?
            .iter()
            .filter_map(|id| self.rows.get(id))
            .find(|row| row.is_current)
    }

    fn max_version(&self, group_id: Uuid) -> Option<u32> {
        self.groups
            .get(&group_id)?
            .iter()
            .filter_map(|id| self.rows.get(id))
            .map(|row| row.version_number)
            .max()
    }

    fn insert(&mut self, draft: AnnotationDraft) -> Annotation {
        let id = self.allocate();
        let annotation = draft.into_annotation(id);
        let group_id = annotation.group_id;
        let document = annotation.document;

        let group = self.groups.entry(group_id).or_default();
        if group.is_empty() {
            self.documents.entry(document).or_default().push(group_id);
        }
        group.push(id);

        self.rows.insert(id, annotation.clone());
        annotation
    }

    fn mark_superseded(&mut self, old: AnnotationId, new: AnnotationId) -> Result<()> {
        let row = self
            .rows
            .get_mut(&old)
            .ok_or_else(|| AnnotationError::not_found("annotation", old))?;
        row.is_current = false;
        row.superseded_by_version_id = Some(new);
        row.updated_at = Utc::now();
        Ok(())
    }
}

/// Arena-backed [`AnnotationStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn arena(&self) -> Result<MutexGuard<'_, Arena>> {
        self.inner
            .lock()
            .map_err(|_| AnnotationError::Persistence("memory store lock poisoned".to_string()))
    }

    /// Every row, every version (for invariant checks)
    pub fn all_rows(&self) -> Result<Vec<Annotation>> {
        let arena = self.arena()?;
        let mut rows: Vec<Annotation> = arena.rows.values().cloned().collect();
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }
}

impl AnnotationStore for MemoryStore {
    fn get(&self, id: AnnotationId) -> Result<Annotation> {
        self.arena()?.row(id).cloned()
    }

    fn insert_initial(&self, draft: AnnotationDraft) -> Result<Annotation> {
        let mut arena = self.arena()?;
        if arena.groups.contains_key(&draft.group_id) {
            return Err(AnnotationError::ConcurrentVersionConflict {
                group_id: draft.group_id,
                version_number: draft.version_number,
            });
        }
        Ok(arena.insert(draft))
    }

    fn commit_version(&self, mut draft: AnnotationDraft) -> Result<Annotation> {
        let mut arena = self.arena()?;

        // All checks happen before the first mutation
        let current_id = arena
            .current_of(draft.group_id)
            .map(|row| row.id)
            .ok_or_else(|| AnnotationError::not_found("current version of group", draft.group_id))?;

        let expected = arena.max_version(draft.group_id).unwrap_or(0) + 1;
        check_next_version(draft.group_id, draft.version_number, expected)?;

        draft.parent_version_id = Some(current_id);
        let annotation = arena.insert(draft);
        arena.mark_superseded(current_id, annotation.id)?;

        debug!(
            group_id = %annotation.group_id,
            version = annotation.version_number,
            superseded = %current_id,
            "Committed version"
        );
        Ok(annotation)
    }

    fn supersede(&self, old: AnnotationId, new: AnnotationId) -> Result<()> {
        let mut arena = self.arena()?;
        let old_row = arena.row(old)?;
        let new_row = arena.row(new)?;

        if old_row.group_id != new_row.group_id
            || new_row.version_number != old_row.version_number + 1
        {
            return Err(AnnotationError::Persistence(format!(
                "{} cannot supersede {}: not the next version of the same group",
                new, old
            )));
        }

        arena.mark_superseded(old, new)
    }

    fn max_version(&self, group_id: Uuid) -> Result<Option<u32>> {
        Ok(self.arena()?.max_version(group_id))
    }

    fn group_history(&self, group_id: Uuid) -> Result<Vec<Annotation>> {
        let arena = self.arena()?;
        let ids = arena
            .groups
            .get(&group_id)
            .ok_or_else(|| AnnotationError::not_found("annotation group", group_id))?;

        let mut rows: Vec<Annotation> = ids.iter().filter_map(|id| arena.rows.get(id)).cloned().collect();
        rows.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(rows)
    }

    fn current_for_document(&self, document: DocumentRef) -> Result<Vec<Annotation>> {
        let arena = self.arena()?;
        let mut rows: Vec<Annotation> = arena
            .documents
            .get(&document)
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|group_id| arena.current_of(*group_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by_key(|row| (row.span.start_offset, row.id));
        Ok(rows)
    }

    fn replace_document(
        &self,
        document: DocumentRef,
        drafts: Vec<AnnotationDraft>,
        policy: ReplacePolicy,
    ) -> Result<DocumentReplacement> {
        let mut arena = self.arena()?;

        if let Some(draft) = drafts.iter().find(|d| arena.groups.contains_key(&d.group_id)) {
            return Err(AnnotationError::ConcurrentVersionConflict {
                group_id: draft.group_id,
                version_number: draft.version_number,
            });
        }

        let retired: Vec<AnnotationId> = arena
            .documents
            .get(&document)
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|group_id| arena.current_of(*group_id))
                    .map(|row| row.id)
                    .collect()
            })
            .unwrap_or_default();

        if policy == ReplacePolicy::IfUnannotated && !retired.is_empty() {
            let mut kept: Vec<Annotation> = retired
                .iter()
                .filter_map(|id| arena.rows.get(id).cloned())
                .collect();
            kept.sort_by_key(|row| (row.span.start_offset, row.id));
            return Ok(DocumentReplacement {
                kept,
                ..Default::default()
            });
        }

        let now = Utc::now();
        for id in &retired {
            if let Some(row) = arena.rows.get_mut(id) {
                row.is_current = false;
                row.updated_at = now;
            }
        }

        let inserted = drafts.into_iter().map(|draft| arena.insert(draft)).collect();

        Ok(DocumentReplacement {
            retired,
            inserted,
            kept: Vec::new(),
        })
    }

    fn stamp_review(&self, id: AnnotationId, stamp: ReviewStamp) -> Result<Annotation> {
        let mut arena = self.arena()?;
        let row = arena
            .rows
            .get_mut(&id)
            .ok_or_else(|| AnnotationError::not_found("annotation", id))?;
        check_stamp(row, &stamp)?;

        row.approval_stage = stamp.approval_stage;
        row.validation_status = stamp.validation_status;
        row.validated_by = stamp.validated_by;
        row.validated_at = stamp.validated_at;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    fn clear_document(&self, document: DocumentRef) -> Result<usize> {
        let mut arena = self.arena()?;
        let groups = arena.documents.remove(&document).unwrap_or_default();

        let mut removed = 0;
        for group_id in groups {
            for id in arena.groups.remove(&group_id).unwrap_or_default() {
                if arena.rows.remove(&id).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn statistics(&self, context_id: Option<&str>) -> Result<AnnotationStatistics> {
        let arena = self.arena()?;
        let rows = arena
            .rows
            .values()
            .filter(|row| context_id.map_or(true, |ctx| row.context_id == ctx));
        Ok(AnnotationStatistics::from_rows(rows))
    }
}
