//! Approval workflow.
//!
//! Every operation acts on the current row of a group and checks the stage
//! transition against that row. Approvals and edits fork a new version;
//! a rejection without edits is stamped in place.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::versions::{next_draft, VersionChain};
use crate::adapters::Reviewer;
use crate::domain::{
    validate_transition, Annotation, AnnotationId, AnnotationUpdate, ApprovalStage,
    ValidationStatus,
};
use crate::error::{AnnotationError, Result};
use crate::store::ReviewStamp;

/// Workflow limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Rebase attempts after a version conflict
    #[serde(default = "default_max_version_retries")]
    pub max_version_retries: u32,

    #[serde(default = "default_review_timeout")]
    pub review_timeout_seconds: u64,
}

fn default_max_batch_size() -> usize {
    50
}
fn default_max_version_retries() -> u32 {
    super::versions::DEFAULT_MAX_VERSION_RETRIES
}
fn default_review_timeout() -> u64 {
    60
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_version_retries: default_max_version_retries(),
            review_timeout_seconds: default_review_timeout(),
        }
    }
}

/// Which approval a batch applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Human approval (`approve`)
    User,
    /// Secondary automated review (`llm_approve`)
    Llm,
}

impl std::str::FromStr for BatchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(BatchMode::User),
            "llm" => Ok(BatchMode::Llm),
            other => Err(format!("unknown batch mode '{}' (expected user or llm)", other)),
        }
    }
}

/// Result for one id of a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub id: AnnotationId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Annotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<BatchItemResult>,
    pub summary: BatchSummary,
}

fn require_actor(actor: &str) -> Result<&str> {
    let actor = actor.trim();
    if actor.is_empty() {
        return Err(AnnotationError::MissingActor);
    }
    Ok(actor)
}

/// Drives annotations through the approval stages
#[derive(Clone)]
pub struct ApprovalWorkflow {
    chain: VersionChain,
    settings: WorkflowSettings,
}

impl ApprovalWorkflow {
    pub fn new(chain: VersionChain, settings: WorkflowSettings) -> Self {
        let chain = chain.with_max_retries(settings.max_version_retries);
        Self { chain, settings }
    }

    pub fn chain(&self) -> &VersionChain {
        &self.chain
    }

    fn load_current(&self, id: AnnotationId) -> Result<Annotation> {
        let annotation = self.chain.store().get(id)?;
        if !annotation.is_current {
            return Err(AnnotationError::NotCurrent(id.0));
        }
        Ok(annotation)
    }

    /// `llm_extracted → llm_approved`, if the reviewer agrees.
    ///
    /// The reviewer may re-score confidence and rationale. A declined
    /// verdict leaves the row untouched.
    #[instrument(skip(self, reviewer))]
    pub async fn llm_approve(&self, id: AnnotationId, reviewer: &dyn Reviewer) -> Result<Annotation> {
        let current = self.load_current(id)?;
        validate_transition(current.approval_stage, ApprovalStage::LlmApproved)?;

        let timeout = Duration::from_secs(self.settings.review_timeout_seconds);
        let verdict = match tokio::time::timeout(timeout, reviewer.review(&current, timeout)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                return Err(AnnotationError::UpstreamUnavailable {
                    collaborator: "reviewer",
                    reason: format!("{:#}", e),
                })
            }
            Err(_) => {
                return Err(AnnotationError::UpstreamUnavailable {
                    collaborator: "reviewer",
                    reason: format!("timed out after {:?}", timeout),
                })
            }
        };

        if !verdict.approve {
            let reason = verdict
                .rationale
                .unwrap_or_else(|| "no rationale given".to_string());
            info!(%reason, "Reviewer declined");
            return Err(AnnotationError::ReviewDeclined { id: id.0, reason });
        }

        let update = AnnotationUpdate {
            confidence: verdict.confidence,
            rationale: verdict.rationale,
            ..Default::default()
        };
        update.validate()?;

        self.chain.fork_with(id, |row| {
            validate_transition(row.approval_stage, ApprovalStage::LlmApproved)?;
            Ok(next_draft(row, &update, ApprovalStage::LlmApproved, None))
        })
    }

    /// `llm_approved → user_approved`, optionally with edits. Always forks.
    #[instrument(skip(self, edits))]
    pub fn approve(
        &self,
        id: AnnotationId,
        actor: &str,
        edits: Option<&AnnotationUpdate>,
    ) -> Result<Annotation> {
        let actor = require_actor(actor)?;
        let edits = edits.cloned().unwrap_or_default();
        edits.validate()?;

        let current = self.load_current(id)?;
        validate_transition(current.approval_stage, ApprovalStage::UserApproved)?;

        self.chain.fork_with(id, |row| {
            validate_transition(row.approval_stage, ApprovalStage::UserApproved)?;
            Ok(next_draft(row, &edits, ApprovalStage::UserApproved, Some(actor)))
        })
    }

    /// Any live stage `→ user_rejected`.
    ///
    /// Without edits the current row is stamped in place; with edits a new
    /// version records them.
    #[instrument(skip(self, edits))]
    pub fn reject(
        &self,
        id: AnnotationId,
        actor: &str,
        edits: Option<&AnnotationUpdate>,
    ) -> Result<Annotation> {
        let actor = require_actor(actor)?;
        let current = self.load_current(id)?;
        validate_transition(current.approval_stage, ApprovalStage::UserRejected)?;

        match edits.filter(|e| !e.is_empty()) {
            None => {
                let stamp = ReviewStamp {
                    approval_stage: ApprovalStage::UserRejected,
                    validation_status: ValidationStatus::Rejected,
                    validated_by: Some(actor.to_string()),
                    validated_at: Some(Utc::now()),
                };
                let annotation = self.chain.store().stamp_review(id, stamp)?;
                info!(group_id = %annotation.group_id, "Rejected in place");
                Ok(annotation)
            }
            Some(edits) => {
                edits.validate()?;
                self.chain.fork_with(id, |row| {
                    validate_transition(row.approval_stage, ApprovalStage::UserRejected)?;
                    Ok(next_draft(row, edits, ApprovalStage::UserRejected, Some(actor)))
                })
            }
        }
    }

    /// Fork a new version with field edits, keeping the stage
    #[instrument(skip(self, update))]
    pub fn edit(&self, id: AnnotationId, actor: &str, update: &AnnotationUpdate) -> Result<Annotation> {
        let actor = require_actor(actor)?;
        if update.is_empty() {
            return Err(AnnotationError::InvalidUpdate("no fields to change".to_string()));
        }
        update.validate()?;

        let current = self.load_current(id)?;
        if current.approval_stage == ApprovalStage::UserRejected {
            return Err(AnnotationError::InvalidTransition {
                from: ApprovalStage::UserRejected,
                to: ApprovalStage::UserRejected,
            });
        }

        let annotation = self.chain.fork_with(id, |row| {
            Ok(next_draft(row, update, row.approval_stage, None))
        })?;
        info!(%actor, version = annotation.version_number, "Edited annotation");
        Ok(annotation)
    }

    /// Apply one approval mode to many ids; failures are reported per item.
    ///
    /// Only a batch over the size limit is refused as a whole.
    pub async fn batch_approve(
        &self,
        ids: &[AnnotationId],
        mode: BatchMode,
        actor: &str,
        reviewer: &dyn Reviewer,
    ) -> Result<BatchOutcome> {
        if ids.len() > self.settings.max_batch_size {
            return Err(AnnotationError::BatchTooLarge {
                size: ids.len(),
                limit: self.settings.max_batch_size,
            });
        }

        let mut results = Vec::with_capacity(ids.len());
        let mut summary = BatchSummary {
            requested: ids.len(),
            ..Default::default()
        };

        for &id in ids {
            let result = match mode {
                BatchMode::User => self.approve(id, actor, None),
                BatchMode::Llm => self.llm_approve(id, reviewer).await,
            };

            match result {
                Ok(annotation) => {
                    summary.succeeded += 1;
                    results.push(BatchItemResult {
                        id,
                        success: true,
                        annotation: Some(annotation),
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(%id, error = %e, "Batch item failed");
                    summary.failed += 1;
                    results.push(BatchItemResult {
                        id,
                        success: false,
                        annotation: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            requested = summary.requested,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Batch approval finished"
        );
        Ok(BatchOutcome { results, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{PassThroughReviewer, ReviewVerdict};
    use crate::domain::DocumentRef;
    use crate::store::{contract, AnnotationStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, ApprovalWorkflow) {
        let store = Arc::new(MemoryStore::new());
        let workflow = ApprovalWorkflow::new(
            VersionChain::new(store.clone()),
            WorkflowSettings::default(),
        );
        (store, workflow)
    }

    fn seed(store: &MemoryStore, start: usize, end: usize) -> Annotation {
        store
            .insert_initial(contract::draft(DocumentRef::guideline(1), "eng", start, end))
            .unwrap()
    }

    struct Verdict(ReviewVerdict);

    #[async_trait]
    impl Reviewer for Verdict {
        async fn review(&self, _: &Annotation, _: Duration) -> anyhow::Result<ReviewVerdict> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_llm_approve_forks_with_rescore() {
        let (store, workflow) = setup();
        let x = seed(&store, 0, 9);

        let reviewer = Verdict(ReviewVerdict {
            approve: true,
            confidence: Some(0.95),
            rationale: Some("clear reference".to_string()),
        });
        let y = workflow.llm_approve(x.id, &reviewer).await.unwrap();

        assert_eq!(y.version_number, 2);
        assert_eq!(y.approval_stage, ApprovalStage::LlmApproved);
        assert_eq!(y.validation_status, ValidationStatus::Pending);
        assert_eq!(y.confidence, 0.95);
        assert!(!store.get(x.id).unwrap().is_current);
    }

    #[tokio::test]
    async fn test_declined_review_leaves_row_untouched() {
        let (store, workflow) = setup();
        let x = seed(&store, 0, 9);

        let result = workflow
            .llm_approve(x.id, &Verdict(ReviewVerdict::decline("not about safety")))
            .await;
        assert!(matches!(result, Err(AnnotationError::ReviewDeclined { .. })));
        assert_eq!(store.get(x.id).unwrap(), x);
    }

    #[tokio::test]
    async fn test_user_approval_requires_llm_review() {
        let (store, workflow) = setup();
        let x = seed(&store, 0, 9);
        let result = workflow.approve(x.id, "alice", None);
        assert!(matches!(
            result,
            Err(AnnotationError::InvalidTransition {
                from: ApprovalStage::LlmExtracted,
                to: ApprovalStage::UserApproved
            })
        ));

        let y = workflow.llm_approve(x.id, &PassThroughReviewer).await.unwrap();
        let z = workflow.approve(y.id, "alice", None).unwrap();
        assert_eq!(z.version_number, 3);
        assert_eq!(z.approval_stage, ApprovalStage::UserApproved);
        assert_eq!(z.validated_by.as_deref(), Some("alice"));
        assert_eq!(z.edit_payload, None);
    }

    #[test]
    fn test_actor_is_required() {
        let (store, workflow) = setup();
        let x = seed(&store, 0, 9);
        assert!(matches!(
            workflow.approve(x.id, "  ", None),
            Err(AnnotationError::MissingActor)
        ));
        assert!(matches!(
            workflow.reject(x.id, "", None),
            Err(AnnotationError::MissingActor)
        ));
    }

    #[test]
    fn test_reject_in_place() {
        let (store, workflow) = setup();
        let x = seed(&store, 0, 9);

        let rejected = workflow.reject(x.id, "bob", None).unwrap();
        assert_eq!(rejected.id, x.id);
        assert_eq!(rejected.version_number, 1);
        assert_eq!(rejected.approval_stage, ApprovalStage::UserRejected);
        assert_eq!(rejected.validation_status, ValidationStatus::Rejected);
        assert_eq!(rejected.validated_by.as_deref(), Some("bob"));

        assert!(matches!(
            workflow.reject(x.id, "bob", None),
            Err(AnnotationError::InvalidTransition { .. })
        ));
        assert!(matches!(
            workflow.edit(x.id, "bob", &AnnotationUpdate::concept_uri("X")),
            Err(AnnotationError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_reject_with_edits_forks() {
        let (store, workflow) = setup();
        let x = seed(&store, 0, 9);
        let edits = AnnotationUpdate {
            rationale: Some("wrong concept".to_string()),
            ..Default::default()
        };

        let y = workflow.reject(x.id, "bob", Some(&edits)).unwrap();
        assert_eq!(y.version_number, 2);
        assert_eq!(y.approval_stage, ApprovalStage::UserRejected);
        assert_eq!(y.validation_status, ValidationStatus::Rejected);
        assert_eq!(y.edit_payload, Some(edits));
        assert!(!store.get(x.id).unwrap().is_current);
    }

    #[test]
    fn test_edit_keeps_stage() {
        let (store, workflow) = setup();
        let x = seed(&store, 0, 9);

        assert!(matches!(
            workflow.edit(x.id, "carol", &AnnotationUpdate::default()),
            Err(AnnotationError::InvalidUpdate(_))
        ));

        let y = workflow
            .edit(x.id, "carol", &AnnotationUpdate::concept_uri("http://example.org/eng#Welfare"))
            .unwrap();
        assert_eq!(y.approval_stage, ApprovalStage::LlmExtracted);
        assert_eq!(y.concept.uri, "http://example.org/eng#Welfare");
        assert_eq!(y.validated_by, None);
    }

    #[test]
    fn test_stale_id_is_not_current() {
        let (store, workflow) = setup();
        let x = seed(&store, 0, 9);
        workflow
            .edit(x.id, "carol", &AnnotationUpdate::concept_uri("X"))
            .unwrap();
        assert!(matches!(
            workflow.reject(x.id, "carol", None),
            Err(AnnotationError::NotCurrent(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_size_limit() {
        let (_store, workflow) = setup();
        let ids: Vec<AnnotationId> = (1..=51).map(AnnotationId).collect();
        let result = workflow
            .batch_approve(&ids, BatchMode::User, "alice", &PassThroughReviewer)
            .await;
        assert!(matches!(
            result,
            Err(AnnotationError::BatchTooLarge { size: 51, limit: 50 })
        ));
    }

    #[tokio::test]
    async fn test_llm_batch_reports_per_item() {
        let (store, workflow) = setup();
        let a = seed(&store, 0, 9);
        let b = seed(&store, 10, 15);
        workflow.reject(b.id, "bob", None).unwrap();

        let outcome = workflow
            .batch_approve(&[a.id, b.id], BatchMode::Llm, "", &PassThroughReviewer)
            .await
            .unwrap();

        assert_eq!(
            outcome.summary,
            BatchSummary {
                requested: 2,
                succeeded: 1,
                failed: 1
            }
        );
        assert!(outcome.results[0].success);
        assert!(!outcome.results[1].success);
        assert!(outcome.results[1].error.is_some());
    }
}
