//! Review commands: inspect versions and move annotations through approval.

use anyhow::Result;

use super::{print_annotations, service, EditArgs};
use crate::core::BatchMode;
use crate::domain::{Annotation, AnnotationId};

fn print_detail(a: &Annotation) {
    println!("ID:          {}", a.id);
    println!("Document:    {} (context {})", a.document, a.context_id);
    println!(
        "Span:        {}..{} \"{}\"",
        a.span.start_offset, a.span.end_offset, a.span.text_segment
    );
    println!("Concept:     {} <{}>", a.concept.label, a.concept.uri);
    if let Some(ref concept_type) = a.concept.concept_type {
        println!("Type:        {}", concept_type);
    }
    println!(
        "Source:      {} {}",
        a.concept.source_name,
        a.concept.source_version.as_deref().unwrap_or("")
    );
    println!("Confidence:  {:.2}", a.confidence);
    println!("Model:       {}", a.model_id);
    if let Some(ref rationale) = a.rationale {
        println!("Rationale:   {}", rationale);
    }
    println!("Stage:       {} ({})", a.approval_stage, a.validation_status);
    println!(
        "Version:     {} of group {}{}",
        a.version_number,
        a.group_id,
        if a.is_current { " (current)" } else { "" }
    );
    if let Some(parent) = a.parent_version_id {
        println!("Parent:      {}", parent);
    }
    if let Some(next) = a.superseded_by_version_id {
        println!("Superseded:  by {}", next);
    }
    if let Some(ref by) = a.validated_by {
        let at = a
            .validated_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        println!("Reviewed:    by {} {}", by, at);
    }
    println!("Created:     {}", a.created_at);
}

fn print_result(verb: &str, a: &Annotation) {
    println!(
        "{} annotation {} -> version {} (id {}, stage {})",
        verb, a.group_id, a.version_number, a.id, a.approval_stage
    );
}

pub(super) fn show(id: AnnotationId, json: bool) -> Result<()> {
    let annotation = service()?.get(id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&annotation)?);
    } else {
        print_detail(&annotation);
    }
    Ok(())
}

pub(super) fn history(id: AnnotationId, json: bool) -> Result<()> {
    let versions = service()?.history_for(id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(());
    }

    println!(
        "{:<4} {:<8} {:<15} {:>5} {:<8} {}",
        "VER", "ID", "STAGE", "CONF", "CURRENT", "REVIEWED BY"
    );
    println!("{}", "-".repeat(70));
    for v in &versions {
        println!(
            "{:<4} {:<8} {:<15} {:>5.2} {:<8} {}",
            v.version_number,
            v.id.to_string(),
            v.approval_stage.to_string(),
            v.confidence,
            if v.is_current { "yes" } else { "" },
            v.validated_by.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub(super) async fn llm_approve(id: AnnotationId) -> Result<()> {
    let annotation = service()?.llm_approve(id).await?;
    print_result("Reviewer approved", &annotation);
    Ok(())
}

pub(super) fn approve(id: AnnotationId, actor: &str, edits: &EditArgs) -> Result<()> {
    let update = edits.to_update();
    let edits = (!update.is_empty()).then_some(&update);
    let annotation = service()?.approve(id, actor, edits)?;
    print_result("Approved", &annotation);
    Ok(())
}

pub(super) fn reject(id: AnnotationId, actor: &str, edits: &EditArgs) -> Result<()> {
    let update = edits.to_update();
    let edits = (!update.is_empty()).then_some(&update);
    let annotation = service()?.reject(id, actor, edits)?;
    print_result("Rejected", &annotation);
    Ok(())
}

pub(super) fn edit(id: AnnotationId, actor: &str, edits: &EditArgs) -> Result<()> {
    let annotation = service()?.edit(id, actor, &edits.to_update())?;
    print_result("Edited", &annotation);
    Ok(())
}

pub(super) async fn batch_approve(
    ids: Vec<i64>,
    mode: BatchMode,
    actor: &str,
    json: bool,
) -> Result<()> {
    let ids: Vec<AnnotationId> = ids.into_iter().map(AnnotationId).collect();
    let outcome = service()?.batch_approve(&ids, mode, actor).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let approved: Vec<Annotation> = outcome
        .results
        .iter()
        .filter_map(|r| r.annotation.clone())
        .collect();
    if !approved.is_empty() {
        print_annotations(&approved);
        println!();
    }
    for failure in outcome.results.iter().filter(|r| !r.success) {
        println!(
            "  {} failed: {}",
            failure.id,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!(
        "{} requested, {} approved, {} failed",
        outcome.summary.requested, outcome.summary.succeeded, outcome.summary.failed
    );
    Ok(())
}
