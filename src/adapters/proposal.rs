//! Boundary schema for reasoner proposals.
//!
//! The reasoner is untrusted. Its response is split into raw JSON elements
//! here, and each element must pass [`ProposedMatch::from_value`] before the
//! generator looks at it. Elements that fail are counted, never raised.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// One validated proposal: "this snippet refers to that concept"
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposedMatch {
    pub snippet: String,
    pub concept_uri: String,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ProposalError {
    #[error("proposal does not match the schema: {0}")]
    Shape(String),

    #[error("snippet is empty")]
    EmptySnippet,

    #[error("concept_uri is empty")]
    EmptyConceptUri,

    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

impl ProposedMatch {
    pub fn from_value(value: &Value) -> Result<Self, ProposalError> {
        let proposal = Self::deserialize(value).map_err(|e| ProposalError::Shape(e.to_string()))?;

        if proposal.snippet.trim().is_empty() {
            return Err(ProposalError::EmptySnippet);
        }
        if proposal.concept_uri.trim().is_empty() {
            return Err(ProposalError::EmptyConceptUri);
        }
        if !(0.0..=1.0).contains(&proposal.confidence) {
            return Err(ProposalError::ConfidenceOutOfRange(proposal.confidence));
        }
        Ok(proposal)
    }
}

/// Split a response body into raw proposal elements.
///
/// Accepts a bare array or an object with a `matches` array, optionally
/// wrapped in a fenced code block.
pub fn split_response(body: &str) -> Result<Vec<Value>> {
    let json = strip_code_fence(body.trim());
    let value: Value = serde_json::from_str(json).context("Reasoner response is not JSON")?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("matches") {
            Some(Value::Array(items)) => Ok(items),
            _ => anyhow::bail!("Reasoner response object has no 'matches' array"),
        },
        other => anyhow::bail!("Unexpected reasoner response: {}", other),
    }
}

fn strip_code_fence(body: &str) -> &str {
    let Some(rest) = body.strip_prefix("```") else {
        return body;
    };
    // Drop the info string ("json") on the opening line
    let rest = rest.split_once('\n').map(|(_, r)| r).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
