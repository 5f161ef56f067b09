//! Adapter interfaces for external collaborators.
//!
//! The engine talks to four outside systems: a concept catalog, a document
//! source, a reasoning service that proposes matches, and a secondary
//! reviewer. Each is a trait here with a file-, subprocess- or HTTP-backed
//! implementation. Reasoner and reviewer payloads travel as JSON over a
//! [`Transport`].

pub mod catalog;
pub mod command;
pub mod documents;
pub mod http;
pub mod proposal;
pub mod reasoner;
pub mod reviewer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use catalog::{ConceptCatalog, TierMapping, YamlCatalog};
pub use command::CommandTransport;
pub use documents::{DirectorySource, DocumentSource};
pub use http::HttpTransport;
pub use proposal::{ProposalError, ProposedMatch};
pub use reasoner::{MatchRequest, Reasoner, TransportReasoner};
pub use reviewer::{PassThroughReviewer, ReviewVerdict, Reviewer, TransportReviewer};

use crate::config::TransportSettings;

/// Request/response channel to an external JSON service
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Send one JSON payload and return the raw response body
    async fn exchange(&self, payload: &str, timeout: Duration) -> Result<String>;

    /// Check the service is reachable
    async fn health_check(&self) -> Result<()>;
}

/// Build the transport named by configuration, if any
pub fn transport_from_settings(settings: &TransportSettings) -> Result<Option<Arc<dyn Transport>>> {
    if let Some(ref endpoint) = settings.endpoint {
        let transport = HttpTransport::from_settings(endpoint, settings.token_env.as_deref())?;
        return Ok(Some(Arc::new(transport)));
    }
    if let Some(ref command) = settings.command {
        return Ok(Some(Arc::new(CommandTransport::new(
            command.clone(),
            settings.args.clone(),
        ))));
    }
    Ok(None)
}
