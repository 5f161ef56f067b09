//! Command-line interface for ontoref.
//!
//! Provides commands for generating annotations for documents, walking
//! them through review, inspecting version history and statistics.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{
    transport_from_settings, ConceptCatalog, DirectorySource, MatchRequest, PassThroughReviewer,
    Reasoner, Reviewer, TransportReasoner, TransportReviewer, YamlCatalog,
};
use crate::config::{self, ResolvedConfig};
use crate::core::{
    AnnotationService, ApprovalWorkflow, BatchMode, CancelToken, CandidateGenerator,
    GenerateOutcome, GenerateRequest, GenerationMode, GenerationSettings, Orchestrator,
    RunJournal, VersionChain,
};
use crate::domain::{Annotation, AnnotationId, AnnotationUpdate, DocumentRef, DocumentType};
use crate::store::{AnnotationStore, SqliteStore};

pub mod review;

/// ontoref - versioned concept annotations for guideline and case text
#[derive(Parser, Debug)]
#[command(name = "ontoref")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate annotations for one document
    Generate {
        /// Document as <type>:<id> (e.g. guideline:12)
        #[arg(value_parser = parse_document)]
        document: DocumentRef,

        /// Catalog context whose tiers to use
        #[arg(short, long)]
        context: String,

        #[command(flatten)]
        generation: GenerationArgs,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate annotations for every document in the document root
    GenerateAll {
        /// Catalog context whose tiers to use
        #[arg(short, long)]
        context: String,

        /// Only documents of this type
        #[arg(short = 't', long, value_enum)]
        document_type: Option<DocumentKind>,

        /// Documents processed at once
        #[arg(long, default_value = "4")]
        concurrency: usize,

        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// List the current annotations of a document
    List {
        #[arg(value_parser = parse_document)]
        document: DocumentRef,

        #[arg(long)]
        json: bool,
    },

    /// Show one annotation version
    Show {
        id: i64,

        #[arg(long)]
        json: bool,
    },

    /// Show every version of the group an annotation belongs to
    History {
        id: i64,

        #[arg(long)]
        json: bool,
    },

    /// Ask the secondary reviewer to confirm an annotation
    LlmApprove { id: i64 },

    /// Approve an annotation as a human reviewer
    Approve {
        id: i64,

        #[command(flatten)]
        actor: ActorArgs,

        #[command(flatten)]
        edits: EditArgs,
    },

    /// Reject an annotation
    Reject {
        id: i64,

        #[command(flatten)]
        actor: ActorArgs,

        #[command(flatten)]
        edits: EditArgs,
    },

    /// Create a new version with edited fields
    Edit {
        id: i64,

        #[command(flatten)]
        actor: ActorArgs,

        #[command(flatten)]
        edits: EditArgs,
    },

    /// Approve many annotations at once
    BatchApprove {
        /// Annotation ids
        #[arg(required = true)]
        ids: Vec<i64>,

        /// Which approval to apply
        #[arg(short, long, value_enum, default_value = "user")]
        mode: BatchKind,

        #[command(flatten)]
        actor: ActorArgs,

        #[arg(long)]
        json: bool,
    },

    /// Show annotation statistics
    Stats {
        /// Only annotations of this context
        #[arg(short, long)]
        context: Option<String>,
    },

    /// Show the most recent generation run for a document
    LastRun {
        #[arg(value_parser = parse_document)]
        document: DocumentRef,
    },

    /// Check that a document's spans still match its current text
    Verify {
        #[arg(value_parser = parse_document)]
        document: DocumentRef,

        #[arg(long)]
        json: bool,
    },

    /// Retire every current annotation of a document
    Clear {
        #[arg(value_parser = parse_document)]
        document: DocumentRef,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Document type for CLI (maps to DocumentType)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DocumentKind {
    Guideline,
    Case,
}

impl From<DocumentKind> for DocumentType {
    fn from(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Guideline => DocumentType::Guideline,
            DocumentKind::Case => DocumentType::Case,
        }
    }
}

/// Confidence preset for CLI (maps to GenerationMode)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Recall,
    Balanced,
    Precision,
}

impl From<ModeArg> for GenerationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Recall => GenerationMode::Recall,
            ModeArg::Balanced => GenerationMode::Balanced,
            ModeArg::Precision => GenerationMode::Precision,
        }
    }
}

/// Batch approval kind for CLI (maps to BatchMode)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BatchKind {
    User,
    Llm,
}

impl From<BatchKind> for BatchMode {
    fn from(kind: BatchKind) -> Self {
        match kind {
            BatchKind::User => BatchMode::User,
            BatchKind::Llm => BatchMode::Llm,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct GenerationArgs {
    /// Confidence preset (defaults to the configured mode)
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Explicit confidence floor, overrides the mode
    #[arg(long)]
    pub min_confidence: Option<f64>,

    /// Keep at most this many annotations per document
    #[arg(long)]
    pub max: Option<usize>,

    /// Replace existing current annotations
    #[arg(short, long)]
    pub force: bool,
}

impl GenerationArgs {
    /// Overlay command-line choices on the configured defaults
    pub fn settings(&self, defaults: &GenerationSettings) -> Result<GenerationSettings> {
        let mut settings = defaults.clone();
        if let Some(mode) = self.mode {
            settings.mode = mode.into();
            settings.min_confidence = None;
        }
        if let Some(min) = self.min_confidence {
            anyhow::ensure!(
                (0.0..=1.0).contains(&min),
                "--min-confidence must be within [0, 1]"
            );
            settings.min_confidence = Some(min);
        }
        if self.max.is_some() {
            settings.max_per_document = self.max;
        }
        Ok(settings)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ActorArgs {
    /// Who is reviewing
    #[arg(short, long, env = "ONTOREF_ACTOR")]
    pub actor: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct EditArgs {
    #[arg(long)]
    pub concept_uri: Option<String>,

    #[arg(long)]
    pub concept_label: Option<String>,

    #[arg(long)]
    pub concept_definition: Option<String>,

    #[arg(long)]
    pub concept_type: Option<String>,

    #[arg(long)]
    pub confidence: Option<f64>,

    #[arg(long)]
    pub rationale: Option<String>,
}

impl EditArgs {
    pub fn to_update(&self) -> AnnotationUpdate {
        AnnotationUpdate {
            concept_uri: self.concept_uri.clone(),
            concept_label: self.concept_label.clone(),
            concept_definition: self.concept_definition.clone(),
            concept_type: self.concept_type.clone(),
            confidence: self.confidence,
            rationale: self.rationale.clone(),
        }
    }
}

/// Parse `<type>:<id>`
pub fn parse_document(s: &str) -> std::result::Result<DocumentRef, String> {
    let (kind, id) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <type>:<id>, got '{}'", s))?;
    let document_type: DocumentType = kind.parse()?;
    let document_id: i64 = id
        .parse()
        .map_err(|_| format!("invalid document id '{}'", id))?;
    Ok(DocumentRef::new(document_type, document_id))
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Config => show_config(),
            Commands::Generate {
                document,
                context,
                generation,
                json,
            } => generate(document, context, generation, json).await,
            Commands::GenerateAll {
                context,
                document_type,
                concurrency,
                generation,
            } => generate_all(context, document_type.map(Into::into), concurrency, generation).await,
            Commands::List { document, json } => list_current(document, json),
            Commands::Show { id, json } => review::show(AnnotationId(id), json),
            Commands::History { id, json } => review::history(AnnotationId(id), json),
            Commands::LlmApprove { id } => review::llm_approve(AnnotationId(id)).await,
            Commands::Approve { id, actor, edits } => {
                review::approve(AnnotationId(id), &actor.actor, &edits)
            }
            Commands::Reject { id, actor, edits } => {
                review::reject(AnnotationId(id), &actor.actor, &edits)
            }
            Commands::Edit { id, actor, edits } => {
                review::edit(AnnotationId(id), &actor.actor, &edits)
            }
            Commands::BatchApprove {
                ids,
                mode,
                actor,
                json,
            } => review::batch_approve(ids, mode.into(), &actor.actor, json).await,
            Commands::Stats { context } => show_stats(context.as_deref()),
            Commands::LastRun { document } => last_run(document).await,
            Commands::Verify { document, json } => verify(document, json).await,
            Commands::Clear { document } => clear(document),
        }
    }
}

/// Stand-in used when no reasoner is configured; every call fails
struct UnconfiguredReasoner;

#[async_trait]
impl Reasoner for UnconfiguredReasoner {
    fn model_id(&self) -> &str {
        "unconfigured"
    }

    async fn propose_matches(
        &self,
        _request: &MatchRequest<'_>,
        _timeout: Duration,
    ) -> Result<Vec<Value>> {
        anyhow::bail!("No reasoner configured (set reasoner.command or reasoner.endpoint)")
    }
}

/// Wire the service from resolved configuration
pub fn build_service(cfg: &ResolvedConfig) -> Result<AnnotationService> {
    let store: Arc<dyn AnnotationStore> = Arc::new(
        SqliteStore::open(&cfg.database)
            .with_context(|| format!("Failed to open database: {}", cfg.database.display()))?,
    );

    let catalog: Arc<dyn ConceptCatalog> = if cfg.catalog.exists() {
        Arc::new(YamlCatalog::from_file(&cfg.catalog)?)
    } else {
        debug!(path = %cfg.catalog.display(), "No catalog file, using an empty catalog");
        Arc::new(YamlCatalog::empty())
    };

    let reasoner: Arc<dyn Reasoner> = match transport_from_settings(&cfg.reasoner)? {
        Some(transport) => Arc::new(TransportReasoner::new(
            transport,
            cfg.reasoner.model_id.clone(),
        )),
        None => Arc::new(UnconfiguredReasoner),
    };

    let reviewer: Arc<dyn Reviewer> = match cfg.reviewer.as_ref() {
        Some(settings) => match transport_from_settings(settings)? {
            Some(transport) => Arc::new(TransportReviewer::new(transport)),
            None => Arc::new(PassThroughReviewer),
        },
        None => Arc::new(PassThroughReviewer),
    };

    let generator = CandidateGenerator::new(
        reasoner,
        Duration::from_secs(cfg.reasoner.timeout_seconds),
        cfg.reasoner.retry.clone(),
    );

    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(DirectorySource::new(&cfg.documents)),
        catalog,
        generator,
    )
    .with_journal(RunJournal::open(&cfg.journal)?);

    let workflow = ApprovalWorkflow::new(VersionChain::new(store), cfg.workflow.clone());

    Ok(AnnotationService::new(orchestrator, workflow, reviewer))
}

fn service() -> Result<AnnotationService> {
    build_service(config::config()?)
}

fn require_reasoner(cfg: &ResolvedConfig) -> Result<()> {
    if !cfg.reasoner.is_configured() {
        anyhow::bail!(
            "No reasoner configured. Set reasoner.command or reasoner.endpoint in {}",
            cfg.config_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".ontoref/config.yaml".to_string())
        );
    }
    Ok(())
}

/// Cancel the token on Ctrl-C
fn cancel_on_interrupt(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling after the current step");
            cancel.cancel();
        }
    });
}

async fn generate(
    document: DocumentRef,
    context: String,
    args: GenerationArgs,
    json: bool,
) -> Result<()> {
    let cfg = config::config()?;
    require_reasoner(cfg)?;
    let service = build_service(cfg)?;

    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone());

    let request = GenerateRequest::new(document, context)
        .force_refresh(args.force)
        .with_settings(args.settings(&cfg.generation)?)
        .with_cancel(cancel);

    let outcome = service.generate(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    print_annotations(&outcome.annotations);
    println!();
    print_run_summary(document, &outcome);
    Ok(())
}

async fn generate_all(
    context: String,
    document_type: Option<DocumentType>,
    concurrency: usize,
    args: GenerationArgs,
) -> Result<()> {
    let cfg = config::config()?;
    require_reasoner(cfg)?;
    let service = build_service(cfg)?;
    let settings = args.settings(&cfg.generation)?;

    let documents = service.list_documents(document_type).await?;
    if documents.is_empty() {
        println!("No documents found under {}", cfg.documents.display());
        return Ok(());
    }

    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone());

    let requests = documents
        .into_iter()
        .map(|document| {
            GenerateRequest::new(document, context.clone())
                .force_refresh(args.force)
                .with_settings(settings.clone())
                .with_cancel(cancel.clone())
        })
        .collect();

    let mut results = service.generate_many(requests, concurrency).await;
    results.sort_by_key(|(document, _)| *document);

    println!("{:<18} {:<10} {:>9} {:>9}", "DOCUMENT", "RESULT", "ACCEPTED", "RETIRED");
    println!("{}", "-".repeat(50));

    let mut failed = 0;
    for (document, result) in &results {
        match result {
            Ok(outcome) => {
                let label = if outcome.stats.skipped { "kept" } else { "generated" };
                println!(
                    "{:<18} {:<10} {:>9} {:>9}",
                    document.to_string(),
                    label,
                    outcome.annotations.len(),
                    outcome.stats.retired
                );
            }
            Err(e) => {
                failed += 1;
                println!("{:<18} {:<10} {}", document.to_string(), "failed", e);
            }
        }
    }

    println!();
    println!("{} documents, {} failed", results.len(), failed);
    if failed > 0 {
        anyhow::bail!("{} of {} documents failed", failed, results.len());
    }
    Ok(())
}

fn list_current(document: DocumentRef, json: bool) -> Result<()> {
    let service = service()?;
    let annotations = service.current_for_document(document)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&annotations)?);
        return Ok(());
    }
    if annotations.is_empty() {
        println!("No current annotations for {}", document);
        return Ok(());
    }
    print_annotations(&annotations);
    Ok(())
}

fn show_stats(context: Option<&str>) -> Result<()> {
    let service = service()?;
    let stats = service.get_statistics(context)?;

    println!("Annotations{}", context.map(|c| format!(" ({})", c)).unwrap_or_default());
    println!("  Versions:   {}", stats.total_versions);
    println!("  Current:    {}", stats.current);
    println!("  Groups:     {}", stats.groups);
    println!("  Documents:  {}", stats.documents);
    if let Some(mean) = stats.mean_confidence {
        println!("  Mean conf:  {:.2}", mean);
    }
    println!();
    println!("By stage:");
    for (stage, count) in &stats.by_stage {
        println!("  {:<16} {}", stage.to_string(), count);
    }
    println!();
    println!("By status:");
    for (status, count) in &stats.by_status {
        println!("  {:<16} {}", status.to_string(), count);
    }
    Ok(())
}

async fn last_run(document: DocumentRef) -> Result<()> {
    let cfg = config::config()?;
    let journal = RunJournal::open(&cfg.journal)?;

    let Some(last) = journal.last_outcome(document).await? else {
        println!("No runs recorded for {}", document);
        return Ok(());
    };

    println!("Run ID:   {}", last.run_id);
    println!("Outcome:  {:?}", last.event_type);
    println!("At:       {}", last.timestamp);
    if !last.payload_summary.is_empty() {
        println!("Detail:   {}", last.payload_summary);
    }
    if let Some(ref error) = last.error {
        println!("Error:    {}", error);
    }

    println!();
    println!("Events:");
    for event in journal.run_events(last.run_id).await? {
        let tier = event.tier.as_deref().unwrap_or("-");
        println!(
            "  {:<16} {:<20} {}",
            tier,
            format!("{:?}", event.event_type),
            event.payload_summary
        );
    }
    Ok(())
}

async fn verify(document: DocumentRef, json: bool) -> Result<()> {
    let service = service()?;
    let check = service.verify_document(document).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&check)?);
    } else {
        println!("{:<8} {:<9} {:<12} {}", "ID", "AT", "STATE", "CONTEXT");
        println!("{}", "-".repeat(90));
        for c in &check.checks {
            let state = match c.relocation {
                None => "intact",
                Some(status) => status.as_str(),
            };
            println!(
                "{:<8} {:<9} {:<12} {}",
                c.id.to_string(),
                format!("{}:{}", c.position.line, c.position.col),
                state,
                c.anchor.replace('\n', " ")
            );
        }
        println!();
        if check.digest_matches {
            println!("Text unchanged since annotation");
        } else {
            println!("Text changed since annotation");
        }
    }

    let drifted = check.drifted().count();
    if drifted > 0 {
        anyhow::bail!("{} of {} spans drifted in {}", drifted, check.checks.len(), document);
    }
    Ok(())
}

fn clear(document: DocumentRef) -> Result<()> {
    let service = service()?;
    let retired = service.clear_document(document)?;
    println!("Retired {} annotations of {}", retired, document);
    Ok(())
}

/// Show the resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("ontoref configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:       {}", cfg.home.display());
    println!("  Database:   {}", cfg.database.display());
    println!("  Catalog:    {}", cfg.catalog.display());
    println!("  Documents:  {}", cfg.documents.display());
    println!("  Journal:    {}", cfg.journal.display());
    println!();
    println!("Generation:");
    println!("  Mode:            {}", cfg.generation.mode.as_str());
    println!("  Confidence floor: {:.2}", cfg.generation.confidence_floor());
    match cfg.generation.max_per_document {
        Some(max) => println!("  Max per doc:     {}", max),
        None => println!("  Max per doc:     (unlimited)"),
    }
    println!();
    println!("Reasoner:");
    print_transport(&cfg.reasoner);
    println!("  Model:      {}", cfg.reasoner.model_id);
    println!();
    println!("Reviewer:");
    match cfg.reviewer.as_ref() {
        Some(reviewer) => print_transport(reviewer),
        None => println!("  (none - llm approvals pass through)"),
    }
    println!();
    println!("Workflow:");
    println!("  Max batch size:   {}", cfg.workflow.max_batch_size);
    println!("  Version retries:  {}", cfg.workflow.max_version_retries);
    println!("  Review timeout:   {}s", cfg.workflow.review_timeout_seconds);

    Ok(())
}

fn print_transport(settings: &config::TransportSettings) {
    if let Some(ref endpoint) = settings.endpoint {
        println!("  Endpoint:   {}", endpoint);
    } else if let Some(ref command) = settings.command {
        println!("  Command:    {} {}", command, settings.args.join(" "));
    } else {
        println!("  (not configured)");
    }
    println!("  Timeout:    {}s", settings.timeout_seconds);
    println!("  Attempts:   {}", settings.retry.max_attempts);
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}

pub(crate) fn print_annotations(annotations: &[Annotation]) {
    println!(
        "{:<8} {:<14} {:<15} {:>5} {:<28} {}",
        "ID", "SPAN", "STAGE", "CONF", "TEXT", "CONCEPT"
    );
    println!("{}", "-".repeat(100));
    for a in annotations {
        println!(
            "{:<8} {:<14} {:<15} {:>5.2} {:<28} {}",
            a.id.to_string(),
            format!("{}..{}", a.span.start_offset, a.span.end_offset),
            a.approval_stage.to_string(),
            a.confidence,
            truncate(&a.span.text_segment, 28),
            a.concept.label
        );
    }
}

fn print_run_summary(document: DocumentRef, outcome: &GenerateOutcome) {
    let stats = &outcome.stats;
    if stats.skipped {
        println!(
            "[{} already annotated; use --force to regenerate]",
            document
        );
        return;
    }

    for tier in &stats.tiers {
        match tier.skipped {
            Some(ref reason) => println!("  tier {:<14} skipped: {}", tier.tier, reason),
            None => println!(
                "  tier {:<14} proposed {:>3}  generated {:>3}  accepted {:>3}",
                tier.tier, tier.proposed, tier.generated, tier.accepted
            ),
        }
    }
    eprintln!(
        "\n[Run {}: {} candidates, {} overlapping, {} over cap, {} retired, {} persisted in {}ms]",
        stats.run_id,
        stats.candidates,
        stats.overlap_rejected,
        stats.cap_rejected,
        stats.retired,
        stats.persisted,
        stats.duration_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document() {
        assert_eq!(parse_document("guideline:12").unwrap(), DocumentRef::guideline(12));
        assert_eq!(parse_document("case:7").unwrap(), DocumentRef::case(7));
        assert!(parse_document("case").is_err());
        assert!(parse_document("memo:1").is_err());
        assert!(parse_document("case:x").is_err());
    }

    #[test]
    fn test_generation_args_overlay() {
        let defaults = GenerationSettings {
            mode: GenerationMode::Balanced,
            min_confidence: Some(0.55),
            max_per_document: Some(10),
        };
        let args = GenerationArgs {
            mode: Some(ModeArg::Precision),
            min_confidence: None,
            max: None,
            force: false,
        };

        let settings = args.settings(&defaults).unwrap();
        assert_eq!(settings.mode, GenerationMode::Precision);
        assert_eq!(settings.confidence_floor(), 0.7);
        assert_eq!(settings.max_per_document, Some(10));

        let bad = GenerationArgs {
            min_confidence: Some(2.0),
            ..args
        };
        assert!(bad.settings(&defaults).is_err());
    }

    #[test]
    fn test_cli_parses_review_commands() {
        let cli = Cli::try_parse_from([
            "ontoref",
            "approve",
            "42",
            "--actor",
            "reviewer@example.org",
            "--concept-uri",
            "http://example.org/eng#Honesty",
        ])
        .unwrap();

        match cli.command {
            Commands::Approve { id, actor, edits } => {
                assert_eq!(id, 42);
                assert_eq!(actor.actor, "reviewer@example.org");
                assert_eq!(
                    edits.to_update(),
                    AnnotationUpdate::concept_uri("http://example.org/eng#Honesty")
                );
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "ontoref", "batch-approve", "1", "2", "999", "--mode", "llm", "--actor", "x",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::BatchApprove { ref ids, mode: BatchKind::Llm, .. } if ids == &[1, 2, 999]
        ));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer segment", 10), "a much ...");
    }
}
