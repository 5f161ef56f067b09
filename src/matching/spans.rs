//! Locating proposed snippets in document text.
//!
//! - **Exact match only**: a snippet becomes a span only if its bytes occur
//!   verbatim in the text. Nothing is inferred from near misses.
//! - **First occurrence wins**: when a snippet occurs more than once the
//!   earliest occurrence is used. The match count is kept for auditing.
//! - **UTF-8 byte offsets**: all offsets index the raw text bytes and always
//!   fall on char boundaries.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Result of searching for a snippet in a document
#[derive(Debug, Clone)]
pub struct SnippetMatch {
    /// All byte offset ranges where the snippet was found
    pub matches: Vec<(usize, usize)>,
    /// Whether a whitespace-normalized match exists (diagnostic only)
    pub normalized_hint: bool,
}

impl SnippetMatch {
    pub fn status(&self) -> MatchStatus {
        match self.matches.len() {
            0 => MatchStatus::Unresolved,
            1 => MatchStatus::Resolved,
            _ => MatchStatus::Ambiguous,
        }
    }

    /// The first occurrence, if any
    pub fn selected_match(&self) -> Option<(usize, usize)> {
        self.matches.first().copied()
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }
}

/// Status of snippet resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Exactly one match found
    Resolved,
    /// Multiple matches found, first selected
    Ambiguous,
    /// No match found
    Unresolved,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Resolved => "resolved",
            MatchStatus::Ambiguous => "ambiguous",
            MatchStatus::Unresolved => "unresolved",
        }
    }
}

/// Find all exact matches of `needle` in `haystack`.
///
/// Overlapping occurrences are all reported. Simple sliding window,
/// O(n*m) worst case.
pub fn find_exact_matches(haystack: &[u8], needle: &[u8]) -> Vec<(usize, usize)> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }

    let mut matches = Vec::new();
    let len = needle.len();

    for i in 0..=(haystack.len() - len) {
        if &haystack[i..i + len] == needle {
            matches.push((i, i + len));
        }
    }

    matches
}

/// Whether the snippet exists once whitespace runs are collapsed.
///
/// Used only to explain an unresolved snippet in logs; never produces offsets.
fn has_normalized_match(text: &str, snippet: &str) -> bool {
    let normalized_snippet = normalize_whitespace(snippet);
    !normalized_snippet.is_empty() && normalize_whitespace(text).contains(&normalized_snippet)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find a snippet in a document. Main entry point for span resolution.
pub fn find_snippet(text: &str, snippet: &str) -> SnippetMatch {
    let matches = find_exact_matches(text.as_bytes(), snippet.as_bytes());

    let normalized_hint = if matches.is_empty() {
        has_normalized_match(text, snippet)
    } else {
        false
    };

    SnippetMatch {
        matches,
        normalized_hint,
    }
}

/// SHA256 of a byte slice as "sha256:<hex>"
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Digest of the document text offsets were computed against
pub fn text_digest(text: &str) -> String {
    compute_hash(text.as_bytes())
}

/// Whether `segment` still sits at `[start, end)` in `text`.
///
/// Detects drift when a document changed after annotation.
pub fn span_still_matches(text: &str, start: usize, end: usize, segment: &str) -> bool {
    text.get(start..end).is_some_and(|slice| slice == segment)
}

/// Context around a span, about `window` bytes wide, with ellipses when cut
pub fn extract_anchor_text(text: &str, start: usize, end: usize, window: usize) -> String {
    let len = text.len();
    let remaining = window.saturating_sub(end.saturating_sub(start));
    let each_side = remaining / 2;

    let mut anchor_start = start.saturating_sub(each_side);
    while anchor_start > 0 && !text.is_char_boundary(anchor_start) {
        anchor_start -= 1;
    }

    let mut anchor_end = (end + each_side).min(len);
    while anchor_end < len && !text.is_char_boundary(anchor_end) {
        anchor_end += 1;
    }

    let prefix = if anchor_start > 0 { "..." } else { "" };
    let suffix = if anchor_end < len { "..." } else { "" };

    format!("{}{}{}", prefix, &text[anchor_start..anchor_end], suffix)
}

/// Line and column position (1-indexed for editor compatibility)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

/// Convert a byte offset to a 1-indexed line/column (column counts chars)
pub fn offset_to_line_col(text: &str, offset: usize) -> LineCol {
    let offset = offset.min(text.len());
    let prefix = &text[..offset];

    let line = prefix.matches('\n').count() + 1;
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let col = text[line_start..offset].chars().count() + 1;

    LineCol { line, col }
}
