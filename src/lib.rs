//! ontoref - versioned concept annotations for document text
//!
//! Links byte spans of guideline and case documents to concepts from a
//! tiered catalog. Annotations are proposed by an external reasoning
//! service, filtered and de-overlapped deterministically, then walked
//! through a review workflow where every change is a new version.
//!
//! # Architecture
//!
//! Annotation rows are never edited in place (except a plain rejection):
//! - Each change forks a new version in the same group
//! - Exactly one version per group is current
//! - A generation run swaps a document's current set in a single commit
//!
//! # Modules
//!
//! - `adapters`: Collaborator traits (catalog, documents, reasoner, reviewer)
//! - `core`: Generation, conflict resolution, versioning, approval workflow
//! - `domain`: Data structures (Annotation, ApprovalStage, Candidate)
//! - `matching`: Span location and text digests
//! - `store`: Persistence (in-memory and SQLite)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Annotate a document
//! ontoref generate guideline:12 --context engineering
//!
//! # Review
//! ontoref llm-approve 41
//! ontoref approve 42 --actor reviewer@example.org
//!
//! # Inspect
//! ontoref history 42
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod matching;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{AnnotationService, GenerateRequest, Orchestrator};
pub use domain::{Annotation, AnnotationId, AnnotationUpdate, ApprovalStage, DocumentRef};
pub use error::{AnnotationError, Result};
pub use store::{AnnotationStore, MemoryStore, SqliteStore};
