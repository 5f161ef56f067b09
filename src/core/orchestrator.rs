//! Generation runs and the caller-facing service.
//!
//! A run annotates one document: fetch its text and the context's tiers,
//! ask each tier for candidates (earlier tiers' spans are passed on as
//! exclusions), resolve overlaps once over the union, then swap the
//! document's current set for the accepted one in a single store commit.
//! A tier whose reasoner is unavailable is skipped; anything else aborts the
//! run and leaves the previous set untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::generator::{CandidateGenerator, GenerationSettings, TierStats};
use super::journal::RunJournal;
use super::resolver::SpanResolver;
use super::verify::{check_spans, DocumentCheck};
use super::versions::{initial_draft, VersionChain};
use super::workflow::{ApprovalWorkflow, BatchMode, BatchOutcome};
use crate::adapters::{ConceptCatalog, DocumentSource, Reviewer};
use crate::domain::{
    Annotation, AnnotationId, AnnotationUpdate, ConceptTier, DocumentRef, DocumentType, RunEvent,
    RunEventType, Span,
};
use crate::error::{AnnotationError, Result};
use crate::matching::text_digest;
use crate::store::{AnnotationStatistics, AnnotationStore, ReplacePolicy};

/// Cooperative cancellation, checked between tiers
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(AnnotationError::Cancelled);
        }
        Ok(())
    }
}

/// One generation request
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub document: DocumentRef,
    pub context_id: String,
    /// Replace an existing current set instead of returning it
    pub force_refresh: bool,
    pub settings: GenerationSettings,
    pub cancel: CancelToken,
}

impl GenerateRequest {
    pub fn new(document: DocumentRef, context_id: impl Into<String>) -> Self {
        Self {
            document,
            context_id: context_id.into(),
            force_refresh: false,
            settings: GenerationSettings::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Counts for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationStats {
    pub run_id: Uuid,
    /// Existing annotations returned unchanged
    pub skipped: bool,
    pub tiers: Vec<TierStats>,
    pub candidates: usize,
    pub overlap_rejected: usize,
    pub cap_rejected: usize,
    /// Previously current rows made non-current
    pub retired: usize,
    pub persisted: usize,
    pub duration_ms: u64,
}

impl GenerationStats {
    pub fn skipped_tiers(&self) -> impl Iterator<Item = &TierStats> {
        self.tiers.iter().filter(|t| t.skipped.is_some())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOutcome {
    /// The document's current annotations after the run, in text order
    pub annotations: Vec<Annotation>,
    pub stats: GenerationStats,
}

fn upstream(collaborator: &'static str) -> impl Fn(anyhow::Error) -> AnnotationError {
    move |e| AnnotationError::UpstreamUnavailable {
        collaborator,
        reason: format!("{:#}", e),
    }
}

/// Runs generation for documents
pub struct Orchestrator {
    store: Arc<dyn AnnotationStore>,
    documents: Arc<dyn DocumentSource>,
    catalog: Arc<dyn ConceptCatalog>,
    generator: CandidateGenerator,
    journal: Option<RunJournal>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn AnnotationStore>,
        documents: Arc<dyn DocumentSource>,
        catalog: Arc<dyn ConceptCatalog>,
        generator: CandidateGenerator,
    ) -> Self {
        Self {
            store,
            documents,
            catalog,
            generator,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn documents(&self) -> &Arc<dyn DocumentSource> {
        &self.documents
    }

    fn record(&self, event: RunEvent) {
        if let Some(ref journal) = self.journal {
            if let Err(e) = journal.append(&event) {
                warn!(error = %e, "Failed to append run journal event");
            }
        }
    }

    /// Annotate one document
    #[instrument(
        skip(self, request),
        fields(document = %request.document, context = %request.context_id)
    )]
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateOutcome> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let document = request.document;

        let existing = self.store.current_for_document(document)?;
        if !existing.is_empty() && !request.force_refresh {
            info!(current = existing.len(), "Document already annotated, skipping");
            self.record(RunEvent::new(
                run_id,
                document,
                None,
                RunEventType::RunSkipped,
                format!("{} current annotations", existing.len()),
            ));
            return Ok(GenerateOutcome {
                annotations: existing,
                stats: GenerationStats {
                    run_id,
                    skipped: true,
                    ..Default::default()
                },
            });
        }

        info!(%run_id, force_refresh = request.force_refresh, "Starting generation run");
        self.record(RunEvent::new(
            run_id,
            document,
            None,
            RunEventType::RunStarted,
            format!("context {}", request.context_id),
        ));

        match self.run(run_id, &request).await {
            Ok(outcome) if outcome.stats.skipped => {
                info!(
                    current = outcome.annotations.len(),
                    "Document annotated by a concurrent run, nothing written"
                );
                self.record(
                    RunEvent::new(
                        run_id,
                        document,
                        None,
                        RunEventType::RunSkipped,
                        format!("{} current annotations", outcome.annotations.len()),
                    )
                    .with_duration(started.elapsed().as_millis() as u64),
                );
                Ok(outcome)
            }
            Ok(mut outcome) => {
                outcome.stats.duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    persisted = outcome.stats.persisted,
                    retired = outcome.stats.retired,
                    duration_ms = outcome.stats.duration_ms,
                    "Generation run completed"
                );
                self.record(
                    RunEvent::new(
                        run_id,
                        document,
                        None,
                        RunEventType::RunCompleted,
                        format!(
                            "{} persisted, {} retired",
                            outcome.stats.persisted, outcome.stats.retired
                        ),
                    )
                    .with_duration(outcome.stats.duration_ms),
                );
                Ok(outcome)
            }
            Err(AnnotationError::Cancelled) => {
                info!("Generation run cancelled");
                self.record(
                    RunEvent::new(
                        run_id,
                        document,
                        None,
                        RunEventType::RunCancelled,
                        "cancelled before persisting".to_string(),
                    )
                    .with_duration(started.elapsed().as_millis() as u64),
                );
                Err(AnnotationError::Cancelled)
            }
            Err(e) => {
                error!(error = %e, "Generation run failed");
                self.record(
                    RunEvent::new(
                        run_id,
                        document,
                        None,
                        RunEventType::RunFailed,
                        "previous annotations kept".to_string(),
                    )
                    .with_duration(started.elapsed().as_millis() as u64)
                    .with_error(e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn run(&self, run_id: Uuid, request: &GenerateRequest) -> Result<GenerateOutcome> {
        let document = request.document;
        let settings = &request.settings;

        let text = self
            .documents
            .fetch_text(document)
            .await
            .map_err(upstream("document source"))?
            .ok_or_else(|| AnnotationError::not_found("document", document))?;
        let digest = text_digest(&text);

        let mapping = self
            .catalog
            .mapping_for_context(&request.context_id)
            .await
            .map_err(upstream("concept catalog"))?;
        let source_names: Vec<String> = mapping.iter().map(|m| m.source.clone()).collect();
        let sources = self
            .catalog
            .list_concepts(&source_names)
            .await
            .map_err(upstream("concept catalog"))?;

        let mut exclusions: Vec<Span> = Vec::new();
        let mut candidates = Vec::new();
        let mut tiers = Vec::with_capacity(mapping.len());

        for step in &mapping {
            request.cancel.check()?;

            let Some(source) = sources.get(&step.source) else {
                warn!(
                    tier = %step.tier,
                    source = %step.source,
                    "Concept source not in catalog, skipping tier"
                );
                tiers.push(self.skip_tier(
                    run_id,
                    document,
                    &step.tier,
                    &step.source,
                    "concept source not found".to_string(),
                ));
                continue;
            };

            let tier = ConceptTier {
                name: step.tier.clone(),
                source_name: step.source.clone(),
                source_version: source.version.clone(),
                concepts: source.concepts.clone(),
            };

            match self
                .generator
                .generate_tier(&text, &tier, &exclusions, settings)
                .await
            {
                Ok(outcome) => {
                    self.record(
                        RunEvent::new(
                            run_id,
                            document,
                            Some(tier.name.clone()),
                            RunEventType::TierCompleted,
                            format!(
                                "{} proposed, {} generated, {} discarded",
                                outcome.stats.proposed,
                                outcome.stats.generated,
                                outcome.stats.discarded_total()
                            ),
                        )
                        .with_duration(outcome.stats.duration_ms),
                    );
                    exclusions.extend(outcome.candidates.iter().map(|c| c.span.clone()));
                    candidates.extend(outcome.candidates);
                    tiers.push(outcome.stats);
                }
                Err(e @ AnnotationError::UpstreamUnavailable { .. }) => {
                    warn!(tier = %tier.name, error = %e, "Tier skipped");
                    tiers.push(self.skip_tier(
                        run_id,
                        document,
                        &tier.name,
                        &tier.source_name,
                        e.to_string(),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        let candidate_count = candidates.len();
        let resolution = SpanResolver::new(settings.max_per_document).resolve(candidates);
        for stats in &mut tiers {
            stats.accepted = resolution
                .accepted
                .iter()
                .filter(|c| c.tier == stats.tier)
                .count();
        }

        request.cancel.check()?;

        let drafts = resolution
            .accepted
            .iter()
            .map(|c| initial_draft(document, &request.context_id, c, &digest))
            .collect();
        // The emptiness check is repeated inside the write so a concurrent
        // run that persisted first is never retired by a non-forced one
        let policy = if request.force_refresh {
            ReplacePolicy::Always
        } else {
            ReplacePolicy::IfUnannotated
        };
        let replacement = self.store.replace_document(document, drafts, policy)?;

        if replacement.was_skipped() {
            return Ok(GenerateOutcome {
                annotations: replacement.kept,
                stats: GenerationStats {
                    run_id,
                    skipped: true,
                    tiers,
                    candidates: candidate_count,
                    ..Default::default()
                },
            });
        }

        let stats = GenerationStats {
            run_id,
            skipped: false,
            tiers,
            candidates: candidate_count,
            overlap_rejected: resolution.overlap_rejected.len(),
            cap_rejected: resolution.cap_rejected.len(),
            retired: replacement.retired.len(),
            persisted: replacement.inserted.len(),
            duration_ms: 0,
        };

        Ok(GenerateOutcome {
            annotations: replacement.inserted,
            stats,
        })
    }

    fn skip_tier(
        &self,
        run_id: Uuid,
        document: DocumentRef,
        tier: &str,
        source: &str,
        reason: String,
    ) -> TierStats {
        self.record(
            RunEvent::new(
                run_id,
                document,
                Some(tier.to_string()),
                RunEventType::TierSkipped,
                format!("source {}", source),
            )
            .with_error(reason.clone()),
        );
        TierStats::skipped(tier, source, reason)
    }
}

/// Every caller-facing operation behind one handle
pub struct AnnotationService {
    orchestrator: Orchestrator,
    workflow: ApprovalWorkflow,
    reviewer: Arc<dyn Reviewer>,
}

impl AnnotationService {
    pub fn new(
        orchestrator: Orchestrator,
        workflow: ApprovalWorkflow,
        reviewer: Arc<dyn Reviewer>,
    ) -> Self {
        Self {
            orchestrator,
            workflow,
            reviewer,
        }
    }

    fn chain(&self) -> &VersionChain {
        self.workflow.chain()
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerateOutcome> {
        self.orchestrator.generate(request).await
    }

    /// Run several documents, at most `concurrency` at a time.
    ///
    /// Results come back in completion order, each with its document.
    pub async fn generate_many(
        &self,
        requests: Vec<GenerateRequest>,
        concurrency: usize,
    ) -> Vec<(DocumentRef, Result<GenerateOutcome>)> {
        stream::iter(requests)
            .map(|request| async move {
                let document = request.document;
                (document, self.orchestrator.generate(request).await)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    pub async fn list_documents(
        &self,
        document_type: Option<DocumentType>,
    ) -> anyhow::Result<Vec<DocumentRef>> {
        self.orchestrator.documents().list_documents(document_type).await
    }

    pub async fn llm_approve(&self, id: AnnotationId) -> Result<Annotation> {
        self.workflow.llm_approve(id, self.reviewer.as_ref()).await
    }

    pub fn approve(
        &self,
        id: AnnotationId,
        actor: &str,
        edits: Option<&AnnotationUpdate>,
    ) -> Result<Annotation> {
        self.workflow.approve(id, actor, edits)
    }

    pub fn reject(
        &self,
        id: AnnotationId,
        actor: &str,
        edits: Option<&AnnotationUpdate>,
    ) -> Result<Annotation> {
        self.workflow.reject(id, actor, edits)
    }

    pub fn edit(&self, id: AnnotationId, actor: &str, update: &AnnotationUpdate) -> Result<Annotation> {
        self.workflow.edit(id, actor, update)
    }

    pub async fn batch_approve(
        &self,
        ids: &[AnnotationId],
        mode: BatchMode,
        actor: &str,
    ) -> Result<BatchOutcome> {
        self.workflow
            .batch_approve(ids, mode, actor, self.reviewer.as_ref())
            .await
    }

    pub fn get(&self, id: AnnotationId) -> Result<Annotation> {
        self.chain().store().get(id)
    }

    pub fn get_history(&self, group_id: Uuid) -> Result<Vec<Annotation>> {
        self.chain().get_history(group_id)
    }

    pub fn history_for(&self, id: AnnotationId) -> Result<Vec<Annotation>> {
        self.chain().history_for(id)
    }

    pub fn current_for_document(&self, document: DocumentRef) -> Result<Vec<Annotation>> {
        self.chain().current_for_document(document)
    }

    pub fn get_statistics(&self, context_id: Option<&str>) -> Result<AnnotationStatistics> {
        self.chain().store().statistics(context_id)
    }

    pub fn clear_document(&self, document: DocumentRef) -> Result<usize> {
        self.chain().clear_document(document)
    }

    /// Check the document's current spans against its text as it is now
    pub async fn verify_document(&self, document: DocumentRef) -> Result<DocumentCheck> {
        let text = self
            .orchestrator
            .documents()
            .fetch_text(document)
            .await
            .map_err(upstream("document source"))?
            .ok_or_else(|| AnnotationError::not_found("document", document))?;
        let current = self.current_for_document(document)?;
        Ok(check_spans(document, &text, &current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(AnnotationError::Cancelled)));
    }

    #[test]
    fn test_request_builder() {
        let request = GenerateRequest::new(DocumentRef::case(4), "eng").force_refresh(true);
        assert!(request.force_refresh);
        assert_eq!(request.settings, GenerationSettings::default());
        assert!(!request.cancel.is_cancelled());
    }
}
