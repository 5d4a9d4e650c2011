//! GitHub API error types.
//!
//! Reporting is never retried, but the error still records whether the
//! failure looked transient (5xx, rate limits, network trouble) or permanent
//! (bad credentials, missing permissions, unknown repository). Operators use
//! that to decide whether clicking "Re-run" on the check is worth it.

use std::fmt;
use thiserror::Error;

/// The kind of GitHub API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitHubErrorKind {
    /// Likely to succeed if the delivery is replayed.
    ///
    /// Examples:
    /// - HTTP 5xx (server errors)
    /// - HTTP 429 (rate limited)
    /// - HTTP 403 with a rate limit message
    /// - Network timeouts
    Transient,

    /// Requires a configuration change.
    ///
    /// Examples:
    /// - HTTP 401 (bad token)
    /// - HTTP 403 (token lacks `checks:write` or `pull_requests:write`)
    /// - HTTP 404 (repository not visible to the token)
    /// - HTTP 422 (rejected payload)
    Permanent,
}

impl GitHubErrorKind {
    /// Returns true if replaying the delivery might succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GitHubErrorKind::Transient)
    }
}

/// A GitHub API error.
#[derive(Debug, Error)]
pub struct GitHubApiError {
    pub kind: GitHubErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for GitHubApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "GitHub API error (HTTP {}): {}", code, self.message),
            None => write!(f, "GitHub API error: {}", self.message),
        }
    }
}

impl GitHubApiError {
    /// Creates a permanent error without an octocrab source.
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transient error without an octocrab source.
    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: GitHubErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an octocrab error.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = match &err {
            octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
            _ => None,
        };
        let message = match &err {
            octocrab::Error::GitHub { source, .. } => source.message.clone(),
            other => other.to_string(),
        };

        Self {
            kind: categorize(status_code, &message),
            status_code,
            message,
            source: Some(err),
        }
    }
}

fn categorize(status_code: Option<u16>, message: &str) -> GitHubErrorKind {
    match status_code {
        Some(429) => GitHubErrorKind::Transient,
        Some(403) if is_rate_limit_error(message) => GitHubErrorKind::Transient,
        Some(code) if (500..600).contains(&code) => GitHubErrorKind::Transient,
        Some(_) => GitHubErrorKind::Permanent,
        None if is_network_error(message) => GitHubErrorKind::Transient,
        None => GitHubErrorKind::Permanent,
    }
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limit_error("API rate limit exceeded"));
        assert!(is_rate_limit_error("secondary rate limit"));
        assert!(is_rate_limit_error("abuse detection mechanism"));
        assert!(!is_rate_limit_error("Resource not accessible by integration"));
    }

    #[test]
    fn network_error_detection() {
        assert!(is_network_error("connection timeout"));
        assert!(is_network_error("DNS resolution failed"));
        assert!(is_network_error("request timed out"));
        assert!(!is_network_error("Not found"));
    }

    #[test]
    fn categorize_by_status() {
        assert_eq!(categorize(Some(502), "Bad Gateway"), GitHubErrorKind::Transient);
        assert_eq!(categorize(Some(429), ""), GitHubErrorKind::Transient);
        assert_eq!(
            categorize(Some(403), "API rate limit exceeded for installation"),
            GitHubErrorKind::Transient
        );
        assert_eq!(
            categorize(Some(403), "Resource not accessible by integration"),
            GitHubErrorKind::Permanent
        );
        assert_eq!(categorize(Some(401), "Bad credentials"), GitHubErrorKind::Permanent);
        assert_eq!(categorize(Some(422), "Invalid request"), GitHubErrorKind::Permanent);
        assert_eq!(categorize(None, "connection reset"), GitHubErrorKind::Transient);
        assert_eq!(categorize(None, "failed to parse"), GitHubErrorKind::Permanent);
    }

    #[test]
    fn display_includes_status() {
        let mut err = GitHubApiError::permanent_without_source("Bad credentials");
        assert_eq!(err.to_string(), "GitHub API error: Bad credentials");
        err.status_code = Some(401);
        assert_eq!(err.to_string(), "GitHub API error (HTTP 401): Bad credentials");
    }

    #[test]
    fn error_kind_retriable() {
        assert!(GitHubErrorKind::Transient.is_retriable());
        assert!(!GitHubErrorKind::Permanent.is_retriable());
    }
}
