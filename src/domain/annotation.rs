//! The annotation record and its typed update.
//!
//! An annotation links a byte span of a document to a concept. Every change
//! to an annotation produces a new row (a version) in the same group, except
//! a plain rejection which is applied in place.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::{ApprovalStage, ValidationStatus};
use crate::error::AnnotationError;

/// Store-allocated row id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(pub i64);

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of document an annotation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Guideline,
    Case,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Guideline => "guideline",
            DocumentType::Case => "case",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guideline" => Ok(DocumentType::Guideline),
            "case" => Ok(DocumentType::Case),
            other => Err(format!("unknown document type: {}", other)),
        }
    }
}

/// Identifies one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_type: DocumentType,
    pub document_id: i64,
}

impl DocumentRef {
    pub fn new(document_type: DocumentType, document_id: i64) -> Self {
        Self {
            document_type,
            document_id,
        }
    }

    pub fn guideline(document_id: i64) -> Self {
        Self::new(DocumentType::Guideline, document_id)
    }

    pub fn case(document_id: i64) -> Self {
        Self::new(DocumentType::Case, document_id)
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document_type, self.document_id)
    }
}

/// A half-open byte range `[start_offset, end_offset)` plus the text it covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub text_segment: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Span {
    /// Cut a span out of `text`, checking bounds and char boundaries
    pub fn from_text(text: &str, start: usize, end: usize) -> Result<Self, AnnotationError> {
        if start >= end
            || end > text.len()
            || !text.is_char_boundary(start)
            || !text.is_char_boundary(end)
        {
            return Err(AnnotationError::InvalidSpan { start, end });
        }

        Ok(Self {
            text_segment: text[start..end].to_string(),
            start_offset: start,
            end_offset: end,
        })
    }

    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.start_offset >= self.end_offset
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start_offset < other.end_offset && self.end_offset > other.start_offset
    }
}

/// Reference to a concept in a named, versioned source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRef {
    pub uri: String,
    pub label: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default, rename = "type")]
    pub concept_type: Option<String>,
    pub source_name: String,
    #[serde(default)]
    pub source_version: Option<String>,
}

/// Explicit field edits carried by a new version.
///
/// Identity fields (ids, group, version number, currency) cannot be expressed
/// here, so forking can never corrupt the chain through an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl AnnotationUpdate {
    pub fn concept_uri(uri: impl Into<String>) -> Self {
        Self {
            concept_uri: Some(uri.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), AnnotationError> {
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(AnnotationError::InvalidUpdate(format!(
                    "confidence {} outside [0, 1]",
                    confidence
                )));
            }
        }
        if matches!(self.concept_uri.as_deref(), Some(uri) if uri.trim().is_empty()) {
            return Err(AnnotationError::InvalidUpdate("concept_uri is empty".to_string()));
        }
        if matches!(self.concept_label.as_deref(), Some(label) if label.trim().is_empty()) {
            return Err(AnnotationError::InvalidUpdate("concept_label is empty".to_string()));
        }
        Ok(())
    }

    /// Overlay the set fields onto a draft
    pub fn apply_to(&self, draft: &mut AnnotationDraft) {
        if let Some(ref uri) = self.concept_uri {
            draft.concept.uri = uri.clone();
        }
        if let Some(ref label) = self.concept_label {
            draft.concept.label = label.clone();
        }
        if let Some(ref definition) = self.concept_definition {
            draft.concept.definition = Some(definition.clone());
        }
        if let Some(ref concept_type) = self.concept_type {
            draft.concept.concept_type = Some(concept_type.clone());
        }
        if let Some(confidence) = self.confidence {
            draft.confidence = confidence;
        }
        if let Some(ref rationale) = self.rationale {
            draft.rationale = Some(rationale.clone());
        }
    }
}

/// One version of an annotation, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub document: DocumentRef,
    pub context_id: String,
    pub span: Span,
    pub concept: ConceptRef,
    pub confidence: f64,
    pub model_id: String,
    pub rationale: Option<String>,
    /// sha256 of the full document text the offsets were computed against
    pub source_digest: String,
    pub approval_stage: ApprovalStage,
    pub validation_status: ValidationStatus,
    pub version_number: u32,
    pub group_id: Uuid,
    pub parent_version_id: Option<AnnotationId>,
    pub superseded_by_version_id: Option<AnnotationId>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub validated_by: Option<String>,
    /// Edits that produced this version (audit trail)
    pub edit_payload: Option<AnnotationUpdate>,
}

impl Annotation {
    /// Copy every non-identity field into a draft for the next version
    pub fn to_draft(&self) -> AnnotationDraft {
        AnnotationDraft {
            document: self.document,
            context_id: self.context_id.clone(),
            span: self.span.clone(),
            concept: self.concept.clone(),
            confidence: self.confidence,
            model_id: self.model_id.clone(),
            rationale: self.rationale.clone(),
            source_digest: self.source_digest.clone(),
            approval_stage: self.approval_stage,
            validation_status: self.validation_status,
            version_number: self.version_number,
            group_id: self.group_id,
            parent_version_id: Some(self.id),
            validated_at: self.validated_at,
            validated_by: self.validated_by.clone(),
            edit_payload: None,
            created_at: Utc::now(),
        }
    }
}

/// An annotation version that has not been given a row id yet
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationDraft {
    pub document: DocumentRef,
    pub context_id: String,
    pub span: Span,
    pub concept: ConceptRef,
    pub confidence: f64,
    pub model_id: String,
    pub rationale: Option<String>,
    pub source_digest: String,
    pub approval_stage: ApprovalStage,
    pub validation_status: ValidationStatus,
    pub version_number: u32,
    pub group_id: Uuid,
    pub parent_version_id: Option<AnnotationId>,
    pub validated_at: Option<DateTime<Utc>>,
    pub validated_by: Option<String>,
    pub edit_payload: Option<AnnotationUpdate>,
    pub created_at: DateTime<Utc>,
}

impl AnnotationDraft {
    /// Materialize as the current row of its group
    pub fn into_annotation(self, id: AnnotationId) -> Annotation {
        Annotation {
            id,
            document: self.document,
            context_id: self.context_id,
            span: self.span,
            concept: self.concept,
            confidence: self.confidence,
            model_id: self.model_id,
            rationale: self.rationale,
            source_digest: self.source_digest,
            approval_stage: self.approval_stage,
            validation_status: self.validation_status,
            version_number: self.version_number,
            group_id: self.group_id,
            parent_version_id: self.parent_version_id,
            superseded_by_version_id: None,
            is_current: true,
            created_at: self.created_at,
            updated_at: self.created_at,
            validated_at: self.validated_at,
            validated_by: self.validated_by,
            edit_payload: self.edit_payload,
        }
    }
}
