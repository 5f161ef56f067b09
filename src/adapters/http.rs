//! HTTP transport: POST the request JSON, read the response body.
//!
//! Auth: optional Bearer token read from an environment variable.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::Transport;

/// Non-success response from the endpoint
#[derive(Debug, thiserror::Error)]
#[error("{endpoint} returned {status}: {body}")]
pub struct HttpStatusError {
    pub endpoint: String,
    pub status: u16,
    pub body: String,
}

impl HttpStatusError {
    /// Rate limiting and server-side failures may clear on their own
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || (500..=599).contains(&self.status)
    }
}

/// Transport backed by an HTTP endpoint
pub struct HttpTransport {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Build from configuration; the token is read from `token_env` if named
    pub fn from_settings(endpoint: &str, token_env: Option<&str>) -> Result<Self> {
        let token = match token_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("{} environment variable required", var))?,
            ),
            None => None,
        };
        Ok(Self::new(endpoint, token))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn exchange(&self, payload: &str, timeout: Duration) -> Result<String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .body(payload.to_string());
        if let Some(ref token) = self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response from {}", self.endpoint))?;

        if !status.is_success() {
            return Err(HttpStatusError {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body: text.trim().to_string(),
            }
            .into());
        }
        Ok(text)
    }

    async fn health_check(&self) -> Result<()> {
        self.client
            .head(&self.endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint))?;
        Ok(())
    }
}
