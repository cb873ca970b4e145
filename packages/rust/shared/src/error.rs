//! Error types for sitecast.
//!
//! Library crates use [`SitecastError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all sitecast operations.
#[derive(Debug, thiserror::Error)]
pub enum SitecastError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during crawl, robots fetch, or provider call.
    #[error("network error: {0}")]
    Network(String),

    /// HTML, robots.txt, or JSON parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM provider returned a non-success response (other than 429).
    #[error("LLM call failed{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Llm {
        status: Option<u16>,
        message: String,
    },

    /// LLM provider signalled rate limiting (HTTP 429).
    #[error("LLM provider rate limited the request (HTTP 429): {0}")]
    RateLimited(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (wrong content type, invalid URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A pipeline step ran before the artifact it reads was produced.
    #[error("missing prerequisite: {0}")]
    MissingArtifact(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SitecastError>;

impl SitecastError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a provider error with an optional HTTP status.
    pub fn llm(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Llm {
            status,
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a provider rate limit (the only retryable class).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SitecastError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = SitecastError::validation("content-type image/png is not HTML");
        assert!(err.to_string().contains("image/png"));
    }

    #[test]
    fn llm_error_includes_status_when_known() {
        let err = SitecastError::llm(Some(401), "invalid api key");
        assert_eq!(err.to_string(), "LLM call failed (HTTP 401): invalid api key");

        let err = SitecastError::llm(None, "no choices");
        assert_eq!(err.to_string(), "LLM call failed: no choices");
    }

    #[test]
    fn only_rate_limits_are_retryable() {
        assert!(SitecastError::RateLimited("slow down".into()).is_rate_limited());
        assert!(!SitecastError::llm(Some(500), "boom").is_rate_limited());
        assert!(!SitecastError::parse("bad json").is_rate_limited());
    }
}
