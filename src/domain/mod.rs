//! Domain types for the annotation engine.
//!
//! This module contains the core data structures:
//! - Annotation: a versioned span-to-concept link
//! - Stage: the approval state machine
//! - Candidate: a located, scored proposal
//! - Concept: catalog concepts and tiers
//! - Events: run journal entries

pub mod annotation;
pub mod candidate;
pub mod concept;
pub mod events;
pub mod stage;

// Re-export commonly used types
pub use annotation::{
    Annotation, AnnotationDraft, AnnotationId, AnnotationUpdate, ConceptRef, DocumentRef,
    DocumentType, Span,
};
pub use candidate::{Candidate, DiscardReason};
pub use concept::{Concept, ConceptSource, ConceptTier};
pub use events::{RunEvent, RunEventType};
pub use stage::{validate_transition, ApprovalStage, ValidationStatus};
