//! Secondary automated reviewer consulted by `llm_approve`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Transport;
use crate::domain::Annotation;

/// The reviewer's answer for one annotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub approve: bool,
    /// Replacement confidence, if the reviewer re-scored
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl ReviewVerdict {
    pub fn approve() -> Self {
        Self {
            approve: true,
            confidence: None,
            rationale: None,
        }
    }

    pub fn decline(rationale: impl Into<String>) -> Self {
        Self {
            approve: false,
            confidence: None,
            rationale: Some(rationale.into()),
        }
    }
}

#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, annotation: &Annotation, timeout: Duration) -> Result<ReviewVerdict>;
}

/// Reviewer reached through a JSON [`Transport`]
pub struct TransportReviewer {
    transport: Arc<dyn Transport>,
}

impl TransportReviewer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Reviewer for TransportReviewer {
    async fn review(&self, annotation: &Annotation, timeout: Duration) -> Result<ReviewVerdict> {
        let payload =
            serde_json::to_string(annotation).context("Failed to serialize annotation")?;
        let body = self
            .transport
            .exchange(&payload, timeout)
            .await
            .with_context(|| format!("Reviewer call via {} failed", self.transport.name()))?;

        let verdict: ReviewVerdict =
            serde_json::from_str(body.trim()).context("Reviewer verdict is not valid JSON")?;
        if let Some(confidence) = verdict.confidence {
            anyhow::ensure!(
                (0.0..=1.0).contains(&confidence),
                "Reviewer confidence {} outside [0, 1]",
                confidence
            );
        }
        Ok(verdict)
    }
}

/// Approves everything unchanged (used when no reviewer is configured)
pub struct PassThroughReviewer;

#[async_trait]
impl Reviewer for PassThroughReviewer {
    async fn review(&self, _annotation: &Annotation, _timeout: Duration) -> Result<ReviewVerdict> {
        Ok(ReviewVerdict::approve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_defaults() {
        let verdict: ReviewVerdict = serde_json::from_str(r#"{"approve": false}"#).unwrap();
        assert!(!verdict.approve);
        assert_eq!(verdict.confidence, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_out_of_range_confidence_is_rejected() {
        use crate::adapters::CommandTransport;
        use crate::store::contract;

        let script = r#"cat > /dev/null; echo '{"approve": true, "confidence": 3.0}'"#;
        let transport = CommandTransport::new("sh", vec!["-c".to_string(), script.to_string()]);
        let reviewer = TransportReviewer::new(Arc::new(transport));

        let annotation = contract::draft(crate::domain::DocumentRef::case(1), "eng", 0, 9)
            .into_annotation(crate::domain::AnnotationId(1));
        let result = reviewer.review(&annotation, Duration::from_secs(5)).await;
        assert!(result.is_err());
    }
}
