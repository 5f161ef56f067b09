//! The reasoning collaborator that proposes text-to-concept matches.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::proposal::split_response;
use super::Transport;
use crate::domain::{Concept, Span};

/// What the reasoner is asked for one tier
#[derive(Debug, Clone, Serialize)]
pub struct MatchRequest<'a> {
    pub tier: &'a str,
    pub text: &'a str,
    pub concepts: &'a [Concept],
    /// Spans already claimed by earlier tiers (a hint, not enforced here)
    pub exclusions: &'a [Span],
}

/// Proposes raw, unvalidated matches
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Model identifier recorded on every annotation it produced
    fn model_id(&self) -> &str;

    async fn propose_matches(
        &self,
        request: &MatchRequest<'_>,
        timeout: Duration,
    ) -> Result<Vec<Value>>;
}

/// Reasoner reached through a JSON [`Transport`]
pub struct TransportReasoner {
    transport: Arc<dyn Transport>,
    model_id: String,
}

impl TransportReasoner {
    pub fn new(transport: Arc<dyn Transport>, model_id: impl Into<String>) -> Self {
        Self {
            transport,
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl Reasoner for TransportReasoner {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn propose_matches(
        &self,
        request: &MatchRequest<'_>,
        timeout: Duration,
    ) -> Result<Vec<Value>> {
        let payload = serde_json::to_string(request).context("Failed to serialize match request")?;
        let body = self
            .transport
            .exchange(&payload, timeout)
            .await
            .with_context(|| format!("Reasoner call via {} failed", self.transport.name()))?;
        split_response(&body)
    }
}
