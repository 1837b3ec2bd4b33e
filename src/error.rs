//! Error types for issue-mirror
//!
//! Configuration and validation failures are fatal for a run; everything raised
//! while talking to a remote store is caught per issue by the engine.

use crate::integrations::retry::{RetryDecision, RetryableError};
use crate::reconcile::ValidationReport;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for issue-mirror operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Unusable configuration (bad URL, empty level table, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required source fields missing or of the wrong shape
    #[error("Field validation failed with {} error(s)", .0.errors.len())]
    Validation(ValidationReport),

    /// Remote store returned an error response
    #[error("Integration error: {0}")]
    Integration(String),

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    #[error("Issue not found: {0}")]
    NotFound(String),

    /// The source workflow offers no transition into the requested status
    #[error("No transition from {id} to status '{status}'")]
    NoTransition { id: String, status: String },

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// A field transform could not produce a value
    #[error("Transform error: {0}")]
    Transform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metadata codec error: {0}")]
    Codec(#[from] syncmark::Error),

    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Whether this error must abort the whole run rather than a single issue
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Config(_) | SyncError::Validation(_))
    }
}

impl RetryableError for SyncError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            SyncError::Network(_) => RetryDecision::Retry,
            SyncError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else if let Some(status) = e.status() {
                    match status.as_u16() {
                        429 => RetryDecision::RetryAfter(Duration::from_secs(60)),
                        500..=599 => RetryDecision::Retry,
                        _ => RetryDecision::NoRetry,
                    }
                } else if e.is_decode() || e.is_builder() {
                    RetryDecision::NoRetry
                } else {
                    RetryDecision::Retry
                }
            }
            SyncError::RateLimited(secs) => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
            SyncError::Integration(msg) => {
                if msg.contains("HTTP 5") {
                    RetryDecision::Retry
                } else {
                    RetryDecision::NoRetry
                }
            }
            SyncError::Config(_)
            | SyncError::Validation(_)
            | SyncError::NotFound(_)
            | SyncError::NoTransition { .. }
            | SyncError::Transform(_)
            | SyncError::Io(_)
            | SyncError::Json(_)
            | SyncError::Yaml(_)
            | SyncError::Codec(_)
            | SyncError::Anyhow(_)
            | SyncError::Other(_) => RetryDecision::NoRetry,
        }
    }
}

/// Extract retry-after seconds from a `Retry-After` header value
pub(crate) fn parse_retry_after(value: Option<&str>) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SyncError::Config("bad".into()).is_fatal());
        assert!(SyncError::Validation(ValidationReport::default()).is_fatal());
        assert!(!SyncError::Network("reset".into()).is_fatal());
        assert!(!SyncError::NoTransition {
            id: "X-1".into(),
            status: "Done".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_retry_decisions() {
        assert_eq!(
            SyncError::Network("reset".into()).retry_decision(),
            RetryDecision::Retry
        );
        assert_eq!(
            SyncError::RateLimited(30).retry_decision(),
            RetryDecision::RetryAfter(Duration::from_secs(30))
        );
        assert_eq!(
            SyncError::Integration("JIRA API error: HTTP 503 Service Unavailable".into())
                .retry_decision(),
            RetryDecision::Retry
        );
        assert_eq!(
            SyncError::Integration("JIRA API error: HTTP 400 Bad Request".into()).retry_decision(),
            RetryDecision::NoRetry
        );
        assert_eq!(
            SyncError::NotFound("X-1".into()).retry_decision(),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("17")), 17);
        assert_eq!(parse_retry_after(Some("soon")), 60);
        assert_eq!(parse_retry_after(None), 60);
    }
}
