//! Behaviour every `AnnotationStore` backend must share.
//!
//! Each backend's test module calls these with a fresh store.

use chrono::Utc;
use uuid::Uuid;

use super::{AnnotationStore, ReplacePolicy, ReviewStamp};
use crate::domain::{
    Annotation, AnnotationDraft, AnnotationId, ApprovalStage, ConceptRef, DocumentRef, Span,
    ValidationStatus,
};
use crate::error::AnnotationError;

pub const TEXT: &str =
    "Engineers shall hold paramount the safety, health, and welfare of the public.";

pub fn draft(document: DocumentRef, context_id: &str, start: usize, end: usize) -> AnnotationDraft {
    AnnotationDraft {
        document,
        context_id: context_id.to_string(),
        span: Span::from_text(TEXT, start, end).unwrap(),
        concept: ConceptRef {
            uri: "http://example.org/eng#Safety".to_string(),
            label: "Safety".to_string(),
            definition: Some("Freedom from unacceptable risk".to_string()),
            concept_type: Some("principle".to_string()),
            source_name: "core".to_string(),
            source_version: Some("1".to_string()),
        },
        confidence: 0.8,
        model_id: "test-model".to_string(),
        rationale: Some("mentions safety".to_string()),
        source_digest: "sha256:test".to_string(),
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

fn next_draft(annotation: &Annotation, version_number: u32) -> AnnotationDraft {
    let mut next = annotation.to_draft();
    next.version_number = version_number;
    next
}

pub fn fork_supersedes_current(store: &dyn AnnotationStore) {
    let doc = DocumentRef::guideline(1);
    let v1 = store.insert_initial(draft(doc, "eng", 0, 9)).unwrap();
    assert_eq!(v1.version_number, 1);
    assert!(v1.is_current);

    let v2 = store.commit_version(next_draft(&v1, 2)).unwrap();
    assert!(v2.is_current);
    assert_eq!(v2.version_number, 2);
    assert_eq!(v2.group_id, v1.group_id);
    assert_eq!(v2.parent_version_id, Some(v1.id));

    let old = store.get(v1.id).unwrap();
    assert!(!old.is_current);
    assert_eq!(old.superseded_by_version_id, Some(v2.id));

    let history = store.group_history(v1.group_id).unwrap();
    let ids: Vec<AnnotationId> = history.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![v2.id, v1.id]);
    assert_eq!(store.max_version(v1.group_id).unwrap(), Some(2));

    let current = store.current_for_document(doc).unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, v2.id);
}

pub fn taken_version_is_a_conflict(store: &dyn AnnotationStore) {
    let doc = DocumentRef::guideline(2);
    let v1 = store.insert_initial(draft(doc, "eng", 0, 9)).unwrap();
    let v2 = store.commit_version(next_draft(&v1, 2)).unwrap();

    // A writer that read before v2 existed computes 2 again
    let stale = store.commit_version(next_draft(&v1, 2));
    assert!(matches!(
        stale,
        Err(AnnotationError::ConcurrentVersionConflict { version_number: 2, .. })
    ));

    let gap = store.commit_version(next_draft(&v1, 5));
    assert!(matches!(gap, Err(AnnotationError::Persistence(_))));

    // Nothing was half-applied
    let history = store.group_history(v1.group_id).unwrap();
    assert_eq!(history.len(), 2);
    assert!(store.get(v2.id).unwrap().is_current);
}

pub fn replace_document_retires_previous_set(store: &dyn AnnotationStore) {
    let doc = DocumentRef::case(3);
    let old: Vec<Annotation> = [(0, 9), (10, 15), (16, 20)]
        .into_iter()
        .map(|(s, e)| store.insert_initial(draft(doc, "eng", s, e)).unwrap())
        .collect();

    let replacement = store
        .replace_document(
            doc,
            vec![draft(doc, "eng", 21, 30), draft(doc, "eng", 35, 41)],
            ReplacePolicy::Always,
        )
        .unwrap();

    assert!(!replacement.was_skipped());
    assert_eq!(replacement.retired.len(), 3);
    assert_eq!(replacement.inserted.len(), 2);

    let current = store.current_for_document(doc).unwrap();
    let current_ids: Vec<AnnotationId> = current.iter().map(|a| a.id).collect();
    let inserted_ids: Vec<AnnotationId> = replacement.inserted.iter().map(|a| a.id).collect();
    assert_eq!(current_ids, inserted_ids);

    for annotation in old {
        let row = store.get(annotation.id).unwrap();
        assert!(!row.is_current);
        assert_eq!(row.superseded_by_version_id, None);
    }
}

pub fn replace_if_unannotated_keeps_existing_set(store: &dyn AnnotationStore) {
    let doc = DocumentRef::case(10);

    let first = store
        .replace_document(doc, vec![draft(doc, "eng", 0, 9)], ReplacePolicy::IfUnannotated)
        .unwrap();
    assert!(!first.was_skipped());
    assert_eq!(first.inserted.len(), 1);

    // A second run that also saw an empty document must not retire the first
    let second = store
        .replace_document(doc, vec![draft(doc, "eng", 10, 15)], ReplacePolicy::IfUnannotated)
        .unwrap();
    assert!(second.was_skipped());
    assert!(second.retired.is_empty());
    assert!(second.inserted.is_empty());
    assert_eq!(second.kept.len(), 1);
    assert_eq!(second.kept[0].id, first.inserted[0].id);

    let current = store.current_for_document(doc).unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, first.inserted[0].id);
    assert_eq!(store.group_history(first.inserted[0].group_id).unwrap().len(), 1);
}

pub fn stamp_review_in_place(store: &dyn AnnotationStore) {
    let doc = DocumentRef::guideline(4);
    let v1 = store.insert_initial(draft(doc, "eng", 0, 9)).unwrap();

    let stamped = store
        .stamp_review(
            v1.id,
            ReviewStamp {
                approval_stage: ApprovalStage::UserRejected,
                validation_status: ValidationStatus::Rejected,
                validated_by: Some("alice".to_string()),
                validated_at: Some(Utc::now()),
            },
        )
        .unwrap();

    assert_eq!(stamped.id, v1.id);
    assert_eq!(stamped.version_number, 1);
    assert_eq!(stamped.approval_stage, ApprovalStage::UserRejected);
    assert_eq!(stamped.validation_status, ValidationStatus::Rejected);
    assert_eq!(stamped.validated_by.as_deref(), Some("alice"));
    assert_eq!(store.group_history(v1.group_id).unwrap().len(), 1);

    let v2 = store.commit_version(next_draft(&stamped, 2)).unwrap();
    let stale = store.stamp_review(
        v1.id,
        ReviewStamp {
            approval_stage: ApprovalStage::UserRejected,
            validation_status: ValidationStatus::Rejected,
            validated_by: None,
            validated_at: None,
        },
    );
    assert!(matches!(stale, Err(AnnotationError::NotCurrent(id)) if id == v1.id.0));
    assert!(store.get(v2.id).unwrap().is_current);
}

pub fn stamp_review_rechecks_stage(store: &dyn AnnotationStore) {
    let doc = DocumentRef::guideline(11);
    let v1 = store.insert_initial(draft(doc, "eng", 0, 9)).unwrap();
    let reject = |by: &str| ReviewStamp {
        approval_stage: ApprovalStage::UserRejected,
        validation_status: ValidationStatus::Rejected,
        validated_by: Some(by.to_string()),
        validated_at: Some(Utc::now()),
    };

    store.stamp_review(v1.id, reject("alice")).unwrap();
    let second = store.stamp_review(v1.id, reject("bob"));
    assert!(matches!(
        second,
        Err(AnnotationError::InvalidTransition {
            from: ApprovalStage::UserRejected,
            to: ApprovalStage::UserRejected,
        })
    ));
    assert_eq!(store.get(v1.id).unwrap().validated_by.as_deref(), Some("alice"));
}

pub fn clear_document_removes_all_versions(store: &dyn AnnotationStore) {
    let a = DocumentRef::guideline(5);
    let b = DocumentRef::guideline(6);

    let v1 = store.insert_initial(draft(a, "eng", 0, 9)).unwrap();
    store.commit_version(next_draft(&v1, 2)).unwrap();
    store.insert_initial(draft(a, "eng", 10, 15)).unwrap();
    let other = store.insert_initial(draft(b, "eng", 0, 9)).unwrap();

    assert_eq!(store.clear_document(a).unwrap(), 3);
    assert!(matches!(store.get(v1.id), Err(AnnotationError::NotFound { .. })));
    assert!(store.current_for_document(a).unwrap().is_empty());
    assert_eq!(store.get(other.id).unwrap().id, other.id);
    assert_eq!(store.clear_document(a).unwrap(), 0);
}

pub fn statistics_by_context(store: &dyn AnnotationStore) {
    let a = DocumentRef::guideline(7);
    let b = DocumentRef::case(8);

    let v1 = store.insert_initial(draft(a, "eng", 0, 9)).unwrap();
    let mut next = next_draft(&v1, 2);
    next.approval_stage = ApprovalStage::LlmApproved;
    next.confidence = 0.6;
    store.commit_version(next).unwrap();
    store.insert_initial(draft(a, "eng", 10, 15)).unwrap();
    store.insert_initial(draft(b, "med", 0, 9)).unwrap();

    let all = store.statistics(None).unwrap();
    assert_eq!(all.total_versions, 4);
    assert_eq!(all.current, 3);
    assert_eq!(all.groups, 3);
    assert_eq!(all.documents, 2);
    assert_eq!(all.by_stage.get(&ApprovalStage::LlmApproved), Some(&1));
    assert_eq!(all.by_stage.get(&ApprovalStage::LlmExtracted), Some(&2));
    assert_eq!(all.by_status.get(&ValidationStatus::Pending), Some(&3));
    let mean = all.mean_confidence.unwrap();
    assert!((mean - (0.6 + 0.8 + 0.8) / 3.0).abs() < 1e-9);

    let med = store.statistics(Some("med")).unwrap();
    assert_eq!(med.total_versions, 1);
    assert_eq!(med.current, 1);
    assert_eq!(med.documents, 1);

    let none = store.statistics(Some("unknown")).unwrap();
    assert_eq!(none.total_versions, 0);
    assert_eq!(none.mean_confidence, None);
}

pub fn supersede_requires_next_version(store: &dyn AnnotationStore) {
    let doc = DocumentRef::guideline(9);
    let a = store.insert_initial(draft(doc, "eng", 0, 9)).unwrap();
    let b = store.insert_initial(draft(doc, "eng", 10, 15)).unwrap();

    assert!(store.supersede(a.id, b.id).is_err());
    assert!(store.get(a.id).unwrap().is_current);
}

pub fn missing_rows(store: &dyn AnnotationStore) {
    assert!(matches!(
        store.get(AnnotationId(999)),
        Err(AnnotationError::NotFound { .. })
    ));
    assert!(matches!(
        store.group_history(Uuid::new_v4()),
        Err(AnnotationError::NotFound { .. })
    ));
    assert!(matches!(
        store.commit_version(draft(DocumentRef::case(1), "eng", 0, 9)),
        Err(AnnotationError::NotFound { .. })
    ));
    assert!(store
        .current_for_document(DocumentRef::case(404))
        .unwrap()
        .is_empty());
    assert_eq!(store.max_version(Uuid::new_v4()).unwrap(), None);
}
