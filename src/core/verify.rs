//! Drift check: do stored spans still match the document text?
//!
//! Offsets are only meaningful against the text they were computed on.
//! When a document is edited after annotation, each current span is checked
//! in place and, if it no longer matches, its segment is searched for again
//! so a reviewer can see whether it moved or vanished. Nothing is rewritten.

use serde::Serialize;

use crate::domain::{Annotation, AnnotationId, DocumentRef};
use crate::matching::{
    extract_anchor_text, find_snippet, offset_to_line_col, span_still_matches, text_digest,
    LineCol, MatchStatus,
};

/// Bytes of surrounding context shown per span
const ANCHOR_WINDOW: usize = 80;

/// Result for one current annotation
#[derive(Debug, Clone, Serialize)]
pub struct SpanCheck {
    pub id: AnnotationId,
    /// Where the stored span starts in the current text
    pub position: LineCol,
    /// Segment still sits at the stored offsets
    pub intact: bool,
    /// For a drifted span, how its segment resolves in the current text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relocation: Option<MatchStatus>,
    /// New offsets if the segment resolves elsewhere
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relocated_to: Option<(usize, usize)>,
    /// Context around the stored offsets (or the relocation)
    pub anchor: String,
}

/// Result for one document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentCheck {
    pub document: DocumentRef,
    /// Every current annotation was made against this exact text
    pub digest_matches: bool,
    pub checks: Vec<SpanCheck>,
}

impl DocumentCheck {
    pub fn drifted(&self) -> impl Iterator<Item = &SpanCheck> {
        self.checks.iter().filter(|c| !c.intact)
    }

    pub fn is_clean(&self) -> bool {
        self.checks.iter().all(|c| c.intact)
    }
}

/// Check `annotations` against `text`. Pure; no I/O.
pub fn check_spans(document: DocumentRef, text: &str, annotations: &[Annotation]) -> DocumentCheck {
    let digest = text_digest(text);
    let digest_matches = annotations.iter().all(|a| a.source_digest == digest);

    let checks = annotations
        .iter()
        .map(|a| check_one(text, a))
        .collect();

    DocumentCheck {
        document,
        digest_matches,
        checks,
    }
}

fn check_one(text: &str, annotation: &Annotation) -> SpanCheck {
    let span = &annotation.span;

    if span_still_matches(text, span.start_offset, span.end_offset, &span.text_segment) {
        return SpanCheck {
            id: annotation.id,
            position: offset_to_line_col(text, span.start_offset),
            intact: true,
            relocation: None,
            relocated_to: None,
            anchor: extract_anchor_text(text, span.start_offset, span.end_offset, ANCHOR_WINDOW),
        };
    }

    let found = find_snippet(text, &span.text_segment);
    let relocated_to = found.selected_match();
    let (start, end) = relocated_to.unwrap_or_else(|| {
        // Clamp the stale offsets to something printable
        let mut start = span.start_offset.min(text.len());
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        (start, start)
    });

    SpanCheck {
        id: annotation.id,
        position: offset_to_line_col(text, start),
        intact: false,
        relocation: Some(found.status()),
        relocated_to,
        anchor: extract_anchor_text(text, start, end, ANCHOR_WINDOW),
    }
}
