//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use ontoref::adapters::{
    DocumentSource, MatchRequest, PassThroughReviewer, Reasoner, Reviewer, YamlCatalog,
};
use ontoref::core::{
    AnnotationService, ApprovalWorkflow, CancelToken, CandidateGenerator, Orchestrator,
    RetryPolicy, RunJournal, VersionChain, WorkflowSettings,
};
use ontoref::domain::{Candidate, ConceptRef, DocumentRef, DocumentType, Span};
use ontoref::store::{AnnotationStore, MemoryStore};

pub const SAFETY: &str = "http://example.org/eng#PublicSafety";
pub const FAITHFUL: &str = "http://example.org/eng#FaithfulAgent";
pub const DECEPTION: &str = "http://example.org/eng#AvoidDeception";
pub const OBJECTIVITY: &str = "http://example.org/eng#Objectivity";
pub const COMPETENCE: &str = "http://example.org/eng#Competence";

/// Single-sentence document
pub const SHORT_TEXT: &str = "Engineers must hold paramount public safety.";

/// Five independent obligations
pub const CODE_TEXT: &str = "Engineers must hold paramount public safety. \
Engineers shall act as faithful agents. \
Engineers shall avoid deceptive acts. \
Engineers shall issue statements in an objective manner. \
Engineers shall work only in areas of their competence.";

pub const CATALOG: &str = r#"
sources:
  core-ethics:
    version: "3"
    concepts:
      - uri: http://example.org/eng#PublicSafety
        label: Public Safety Principle
      - uri: http://example.org/eng#FaithfulAgent
        label: Faithful Agent
      - uri: http://example.org/eng#AvoidDeception
        label: Avoid Deception
      - uri: http://example.org/eng#Objectivity
        label: Objectivity
  domain-eng:
    concepts:
      - uri: http://example.org/eng#Competence
        label: Competence
        type: obligation
contexts:
  engineering:
    - tier: core
      source: core-ethics
    - tier: domain
      source: domain-eng
  core-only:
    - tier: core
      source: core-ethics
"#;

pub fn proposal(snippet: &str, uri: &str, confidence: f64) -> Value {
    json!({
        "snippet": snippet,
        "concept_uri": uri,
        "confidence": confidence,
        "rationale": format!("'{}' expresses the concept", snippet),
    })
}

/// Proposals for all five obligations of `CODE_TEXT`
pub fn code_proposals() -> (Vec<Value>, Vec<Value>) {
    let core = vec![
        proposal("hold paramount public safety", SAFETY, 0.9),
        proposal("faithful agents", FAITHFUL, 0.85),
        proposal("avoid deceptive acts", DECEPTION, 0.8),
        proposal("objective manner", OBJECTIVITY, 0.75),
    ];
    let domain = vec![proposal("areas of their competence", COMPETENCE, 0.7)];
    (core, domain)
}

/// Answers per tier from a script
#[derive(Default)]
pub struct ScriptedReasoner {
    by_tier: Mutex<HashMap<String, Vec<Value>>>,
    failing: Mutex<HashSet<String>>,
    cancel_on_call: Mutex<Option<CancelToken>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, tier: &str, proposals: Vec<Value>) {
        self.by_tier
            .lock()
            .unwrap()
            .insert(tier.to_string(), proposals);
    }

    pub fn fail_tier(&self, tier: &str) {
        self.failing.lock().unwrap().insert(tier.to_string());
    }

    /// Cancel `token` when the reasoner is next called
    pub fn cancel_during_call(&self, token: CancelToken) {
        *self.cancel_on_call.lock().unwrap() = Some(token);
    }

    /// Make every call take `delay`
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn propose_matches(
        &self,
        request: &MatchRequest<'_>,
        _timeout: Duration,
    ) -> anyhow::Result<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_call.lock().unwrap().take() {
            token.cancel();
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(request.tier) {
            return Err(anyhow::Error::new(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            ))
            .context("service unavailable"));
        }
        Ok(self
            .by_tier
            .lock()
            .unwrap()
            .get(request.tier)
            .cloned()
            .unwrap_or_default())
    }
}

/// Documents held in memory
#[derive(Default)]
pub struct MemoryDocuments {
    texts: Mutex<HashMap<DocumentRef, String>>,
}

impl MemoryDocuments {
    pub fn with(document: DocumentRef, text: &str) -> Self {
        let docs = Self::default();
        docs.put(document, text);
        docs
    }

    pub fn put(&self, document: DocumentRef, text: &str) {
        self.texts.lock().unwrap().insert(document, text.to_string());
    }
}

#[async_trait]
impl DocumentSource for MemoryDocuments {
    async fn fetch_text(&self, document: DocumentRef) -> anyhow::Result<Option<String>> {
        Ok(self.texts.lock().unwrap().get(&document).cloned())
    }

    async fn list_documents(
        &self,
        document_type: Option<DocumentType>,
    ) -> anyhow::Result<Vec<DocumentRef>> {
        let mut docs: Vec<DocumentRef> = self
            .texts
            .lock()
            .unwrap()
            .keys()
            .filter(|d| document_type.map_or(true, |t| d.document_type == t))
            .copied()
            .collect();
        docs.sort();
        Ok(docs)
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        delay_ms: 1,
        ..Default::default()
    }
}

/// Service over a memory store with scripted collaborators
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub reasoner: Arc<ScriptedReasoner>,
    pub documents: Arc<MemoryDocuments>,
    pub service: AnnotationService,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Arc::new(PassThroughReviewer), None)
    }

    pub fn with_reviewer(reviewer: Arc<dyn Reviewer>) -> Self {
        Self::build(reviewer, None)
    }

    pub fn with_journal(path: &Path) -> Self {
        Self::build(Arc::new(PassThroughReviewer), Some(path))
    }

    fn build(reviewer: Arc<dyn Reviewer>, journal: Option<&Path>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let reasoner = Arc::new(ScriptedReasoner::new());
        let documents = Arc::new(MemoryDocuments::default());
        let catalog = Arc::new(YamlCatalog::from_yaml(CATALOG).unwrap());

        let dyn_store: Arc<dyn AnnotationStore> = store.clone();
        let generator =
            CandidateGenerator::new(reasoner.clone(), Duration::from_secs(5), fast_retry());
        let mut orchestrator =
            Orchestrator::new(dyn_store.clone(), documents.clone(), catalog, generator);
        if let Some(path) = journal {
            orchestrator = orchestrator.with_journal(RunJournal::open(path).unwrap());
        }
        let workflow =
            ApprovalWorkflow::new(VersionChain::new(dyn_store), WorkflowSettings::default());

        Self {
            store,
            reasoner,
            documents,
            service: AnnotationService::new(orchestrator, workflow, reviewer),
        }
    }
}

/// A located candidate over `SHORT_TEXT`
pub fn safety_candidate() -> Candidate {
    Candidate {
        span: Span::from_text(SHORT_TEXT, 15, 43).unwrap(),
        concept: ConceptRef {
            uri: SAFETY.to_string(),
            label: "Public Safety Principle".to_string(),
            definition: None,
            concept_type: None,
            source_name: "core-ethics".to_string(),
            source_version: Some("3".to_string()),
        },
        confidence: 0.9,
        rationale: Some("duty to the public".to_string()),
        tier: "core".to_string(),
        model_id: "scripted-model".to_string(),
        match_count: 1,
    }
}
