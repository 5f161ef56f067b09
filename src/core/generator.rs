//! Candidate generation for one concept tier.
//!
//! The reasoner proposes raw matches; this module decides which become
//! candidates. A proposal survives only if it parses, its snippet occurs
//! verbatim in the text, its concept belongs to the tier, and its confidence
//! reaches the floor. Everything else is counted by [`DiscardReason`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use super::retry::RetryPolicy;
use crate::adapters::{MatchRequest, ProposedMatch, Reasoner};
use crate::domain::{Candidate, ConceptTier, DiscardReason, Span};
use crate::error::{AnnotationError, Result};
use crate::matching::find_snippet;

/// Preset confidence floors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Floor 0.4
    Recall,
    /// Floor 0.6
    #[default]
    Balanced,
    /// Floor 0.7
    Precision,
}

impl GenerationMode {
    pub fn confidence_floor(&self) -> f64 {
        match self {
            GenerationMode::Recall => 0.4,
            GenerationMode::Balanced => 0.6,
            GenerationMode::Precision => 0.7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Recall => "recall",
            GenerationMode::Balanced => "balanced",
            GenerationMode::Precision => "precision",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "recall" => Ok(GenerationMode::Recall),
            "balanced" => Ok(GenerationMode::Balanced),
            "precision" => Ok(GenerationMode::Precision),
            other => Err(format!(
                "unknown generation mode '{}' (expected recall, balanced or precision)",
                other
            )),
        }
    }
}

/// Per-call generation knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default)]
    pub mode: GenerationMode,

    /// Explicit floor, overrides the mode's
    #[serde(default)]
    pub min_confidence: Option<f64>,

    /// Upper bound on accepted annotations per document
    #[serde(default)]
    pub max_per_document: Option<usize>,
}

impl GenerationSettings {
    pub fn confidence_floor(&self) -> f64 {
        self.min_confidence
            .unwrap_or_else(|| self.mode.confidence_floor())
    }
}

/// Counts for one tier of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: String,
    pub source_name: String,
    /// Raw elements returned by the reasoner
    pub proposed: usize,
    /// Became candidates
    pub generated: usize,
    /// Survived conflict resolution (filled in by the orchestrator)
    pub accepted: usize,
    pub discarded: BTreeMap<DiscardReason, usize>,
    /// Candidates whose snippet occurred more than once
    pub ambiguous: usize,
    pub duration_ms: u64,
    /// Why the tier produced nothing, if it was skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl TierStats {
    pub fn new(tier: &ConceptTier) -> Self {
        Self {
            tier: tier.name.clone(),
            source_name: tier.source_name.clone(),
            ..Default::default()
        }
    }

    pub fn skipped(tier: impl Into<String>, source_name: impl Into<String>, reason: String) -> Self {
        Self {
            tier: tier.into(),
            source_name: source_name.into(),
            skipped: Some(reason),
            ..Default::default()
        }
    }

    fn discard(&mut self, reason: DiscardReason) {
        *self.discarded.entry(reason).or_insert(0) += 1;
    }

    pub fn discarded_total(&self) -> usize {
        self.discarded.values().sum()
    }
}

/// Candidates and counts for one tier
#[derive(Debug, Clone, Default)]
pub struct TierOutcome {
    pub candidates: Vec<Candidate>,
    pub stats: TierStats,
}

/// Turn raw proposals into candidates. Pure; no I/O.
pub fn evaluate_proposals(
    text: &str,
    tier: &ConceptTier,
    proposals: Vec<Value>,
    floor: f64,
    model_id: &str,
) -> TierOutcome {
    let mut stats = TierStats::new(tier);
    stats.proposed = proposals.len();
    let mut candidates = Vec::new();

    for raw in proposals {
        let proposal = match ProposedMatch::from_value(&raw) {
            Ok(p) => p,
            Err(e) => {
                debug!(tier = %tier.name, error = %e, "Discarding malformed proposal");
                stats.discard(DiscardReason::Malformed);
                continue;
            }
        };

        let found = find_snippet(text, &proposal.snippet);
        let Some((start, end)) = found.selected_match() else {
            debug!(
                tier = %tier.name,
                normalized_hint = found.normalized_hint,
                "Snippet not found verbatim"
            );
            stats.discard(DiscardReason::InvalidSnippet);
            continue;
        };
        if found.match_count() > 1 {
            debug!(
                tier = %tier.name,
                matches = found.match_count(),
                start,
                "Snippet occurs more than once, using first occurrence"
            );
            stats.ambiguous += 1;
        }

        let Some(concept) = tier.find(&proposal.concept_uri) else {
            stats.discard(DiscardReason::UnknownConcept);
            continue;
        };

        if proposal.confidence < floor {
            stats.discard(DiscardReason::LowConfidence);
            continue;
        }

        candidates.push(Candidate {
            span: Span {
                text_segment: text[start..end].to_string(),
                start_offset: start,
                end_offset: end,
            },
            concept: tier.concept_ref(concept),
            confidence: proposal.confidence,
            rationale: proposal.rationale,
            tier: tier.name.clone(),
            model_id: model_id.to_string(),
            match_count: found.match_count(),
        });
    }

    stats.generated = candidates.len();
    TierOutcome { candidates, stats }
}

/// Runs one tier against the reasoner
pub struct CandidateGenerator {
    reasoner: Arc<dyn Reasoner>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl CandidateGenerator {
    pub fn new(reasoner: Arc<dyn Reasoner>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            reasoner,
            timeout,
            retry,
        }
    }

    pub fn model_id(&self) -> &str {
        self.reasoner.model_id()
    }

    /// Propose, validate and locate candidates for one tier.
    ///
    /// Fails only with `UpstreamUnavailable`, after the retry budget.
    #[instrument(skip_all, fields(tier = %tier.name))]
    pub async fn generate_tier(
        &self,
        text: &str,
        tier: &ConceptTier,
        exclusions: &[Span],
        settings: &GenerationSettings,
    ) -> Result<TierOutcome> {
        let started = Instant::now();
        let request = MatchRequest {
            tier: &tier.name,
            text,
            concepts: &tier.concepts,
            exclusions,
        };

        let proposals = self.propose_with_retry(&request).await?;
        let mut outcome = evaluate_proposals(
            text,
            tier,
            proposals,
            settings.confidence_floor(),
            self.reasoner.model_id(),
        );
        outcome.stats.duration_ms = started.elapsed().as_millis() as u64;

        debug!(
            proposed = outcome.stats.proposed,
            generated = outcome.stats.generated,
            discarded = outcome.stats.discarded_total(),
            "Tier evaluated"
        );
        Ok(outcome)
    }

    async fn propose_with_retry(&self, request: &MatchRequest<'_>) -> Result<Vec<Value>> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.timeout,
                self.reasoner.propose_matches(request, self.timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(elapsed) => Err(anyhow::Error::new(elapsed)
                    .context(format!("timed out after {:?}", self.timeout))),
            };

            match result {
                Ok(proposals) => return Ok(proposals),
                Err(e) if self.retry.should_retry(attempt, &e) => {
                    let delay = self.retry.delay();
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Reasoner call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Reasoner call failed permanently");
                    return Err(AnnotationError::UpstreamUnavailable {
                        collaborator: "reasoner",
                        reason: format!("{:#}", e),
                    });
                }
            }
        }
    }
}
