//! Retry budget for collaborator calls.
//!
//! A reasoner call gets the first attempt plus at most one retry, and only
//! when the failure is transient: a timeout, a dropped or refused
//! connection, or an upstream status that says "try later". Malformed
//! output, a missing program or an auth failure fail on the first attempt.

use std::io::ErrorKind;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::http::HttpStatusError;

/// First call plus one retry
pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts including the first, 1 or 2
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause before the retry, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    MAX_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(format!(
                "max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS, self.max_attempts
            ));
        }
        Ok(())
    }

    /// Attempts actually made; an out-of-range value never widens the budget
    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Whether attempt number `attempt` (1-based) that failed with `error`
    /// earns another try
    pub fn should_retry(&self, attempt: u32, error: &anyhow::Error) -> bool {
        attempt < self.attempts() && is_transient(error)
    }
}

/// A failure worth one more try
pub fn is_transient(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        if cause.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return !matches!(
                io.kind(),
                ErrorKind::NotFound
                    | ErrorKind::PermissionDenied
                    | ErrorKind::InvalidInput
                    | ErrorKind::InvalidData
            );
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            return http.is_timeout() || http.is_connect();
        }
        if let Some(status) = cause.downcast_ref::<HttpStatusError>() {
            return status.is_retryable();
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn io(kind: ErrorKind) -> anyhow::Error {
        anyhow::Error::new(std::io::Error::from(kind)).context("Reasoner call via command failed")
    }

    fn status(code: u16) -> anyhow::Error {
        anyhow::Error::new(HttpStatusError {
            endpoint: "http://localhost/match".to_string(),
            status: code,
            body: String::new(),
        })
    }

    #[test]
    fn test_default_allows_one_retry() {
        let policy = RetryPolicy::default();
        let reset = io(ErrorKind::ConnectionReset);
        assert!(policy.should_retry(1, &reset));
        assert!(!policy.should_retry(2, &reset));
        assert!(!RetryPolicy::none().should_retry(1, &reset));
    }

    #[test]
    fn test_budget_never_exceeds_one_retry() {
        let greedy = RetryPolicy {
            max_attempts: 5,
            ..Default::default()
        };
        assert!(greedy.validate().is_err());
        assert_eq!(greedy.attempts(), MAX_ATTEMPTS);
        assert!(!greedy.should_retry(2, &io(ErrorKind::TimedOut)));

        let zero = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        assert_eq!(zero.attempts(), 1);
    }

    #[test]
    fn test_transient_failures() {
        assert!(is_transient(&io(ErrorKind::ConnectionRefused)));
        assert!(is_transient(&io(ErrorKind::UnexpectedEof)));
        assert!(is_transient(&status(503)));
        assert!(is_transient(&status(429)));
    }

    #[tokio::test]
    async fn test_elapsed_is_transient() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let err = Err::<(), _>(elapsed).context("timed out").unwrap_err();
        assert!(is_transient(&err));
    }

    #[test]
    fn test_permanent_failures() {
        assert!(!is_transient(&io(ErrorKind::NotFound)));
        assert!(!is_transient(&io(ErrorKind::PermissionDenied)));
        assert!(!is_transient(&status(401)));
        assert!(!is_transient(&status(400)));
        assert!(!is_transient(&anyhow::anyhow!("reasoner output is not a JSON array")));
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!is_transient(&anyhow::Error::new(parse)));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("max_attempts: 1").unwrap();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_ms, 500);
    }
}
