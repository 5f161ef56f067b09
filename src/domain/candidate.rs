//! Candidates: located, scored proposals that have not been persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::annotation::{ConceptRef, Span};

/// A proposal whose snippet was found verbatim in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub span: Span,
    pub concept: ConceptRef,
    pub confidence: f64,
    pub rationale: Option<String>,
    /// Tier that produced this candidate
    pub tier: String,
    pub model_id: String,
    /// Number of verbatim occurrences of the snippet (the first one is used)
    pub match_count: usize,
}

impl Candidate {
    pub fn start(&self) -> usize {
        self.span.start_offset
    }

    pub fn end(&self) -> usize {
        self.span.end_offset
    }

    pub fn overlaps(&self, other: &Candidate) -> bool {
        self.span.overlaps(&other.span)
    }
}

/// Why a proposal never became a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Payload did not match the proposal schema
    Malformed,
    /// Snippet not found verbatim in the text
    InvalidSnippet,
    /// Concept uri not offered in this tier
    UnknownConcept,
    /// Below the confidence floor
    LowConfidence,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Malformed => "malformed",
            DiscardReason::InvalidSnippet => "invalid_snippet",
            DiscardReason::UnknownConcept => "unknown_concept",
            DiscardReason::LowConfidence => "low_confidence",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
