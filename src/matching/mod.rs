//! Grounding proposals in document text.
//!
//! A reasoner only ever claims a snippet; this module decides whether the
//! claim holds and where. Spans are never generated for text that is not
//! present byte for byte.

pub mod spans;

pub use spans::{
    compute_hash, extract_anchor_text, find_exact_matches, find_snippet, offset_to_line_col,
    span_still_matches, text_digest, LineCol, MatchStatus, SnippetMatch,
};
