//! Greedy span conflict resolution.
//!
//! Candidates are considered in descending confidence order (stable, so
//! ties keep tier order then proposal order). A candidate is accepted only
//! if its half-open interval intersects nothing accepted so far. The result
//! is deterministic but not necessarily the maximum-confidence selection.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::domain::Candidate;

/// Outcome of resolving one document's candidates
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Accepted candidates in text order
    pub accepted: Vec<Candidate>,
    /// Lost to a higher-confidence overlapping candidate
    pub overlap_rejected: Vec<Candidate>,
    /// Non-overlapping but beyond the per-document cap
    pub cap_rejected: Vec<Candidate>,
}

/// Accepted intervals keyed by start offset
#[derive(Debug, Default)]
struct IntervalSet {
    by_start: BTreeMap<usize, usize>,
}

impl IntervalSet {
    /// Whether `[start, end)` intersects any stored interval.
    ///
    /// Stored intervals never overlap each other, so only the nearest one
    /// starting before `end` can reach into the range.
    fn intersects(&self, start: usize, end: usize) -> bool {
        self.by_start
            .range(..end)
            .next_back()
            .is_some_and(|(_, &other_end)| other_end > start)
    }

    fn insert(&mut self, start: usize, end: usize) {
        self.by_start.insert(start, end);
    }
}

/// Picks a non-overlapping subset of candidates
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanResolver {
    max_per_document: Option<usize>,
}

impl SpanResolver {
    pub fn new(max_per_document: Option<usize>) -> Self {
        Self { max_per_document }
    }

    pub fn resolve(&self, candidates: Vec<Candidate>) -> Resolution {
        let mut ordered = candidates;
        // sort_by is stable
        ordered.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });

        let mut intervals = IntervalSet::default();
        let mut resolution = Resolution::default();

        for candidate in ordered {
            if intervals.intersects(candidate.start(), candidate.end()) {
                resolution.overlap_rejected.push(candidate);
                continue;
            }
            if self
                .max_per_document
                .is_some_and(|cap| resolution.accepted.len() >= cap)
            {
                resolution.cap_rejected.push(candidate);
                continue;
            }
            intervals.insert(candidate.start(), candidate.end());
            resolution.accepted.push(candidate);
        }

        resolution.accepted.sort_by_key(|c| c.start());
        resolution
    }
}
