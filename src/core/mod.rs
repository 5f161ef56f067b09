//! Core annotation engine.
//!
//! This module contains:
//! - Generator: per-tier candidate generation against the reasoner
//! - Resolver: greedy, deterministic span conflict resolution
//! - Versions: version chain creation and forking
//! - Workflow: approval state machine and batch approval
//! - Journal: append-only run log
//! - Verify: drift check of stored spans against current text
//! - Orchestrator: generation runs and the caller-facing service

pub mod generator;
pub mod journal;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod verify;
pub mod versions;
pub mod workflow;

// Re-export commonly used types
pub use generator::{
    evaluate_proposals, CandidateGenerator, GenerationMode, GenerationSettings, TierOutcome,
    TierStats,
};
pub use journal::RunJournal;
pub use orchestrator::{
    AnnotationService, CancelToken, GenerateOutcome, GenerateRequest, GenerationStats,
    Orchestrator,
};
pub use resolver::{Resolution, SpanResolver};
pub use retry::RetryPolicy;
pub use verify::{check_spans, DocumentCheck, SpanCheck};
pub use versions::{initial_draft, next_draft, VersionChain};
pub use workflow::{
    ApprovalWorkflow, BatchItemResult, BatchMode, BatchOutcome, BatchSummary, WorkflowSettings,
};
