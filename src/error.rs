//! Error types for the Codecks MCP bridge

use std::io;

use thiserror::Error;

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge errors
///
/// Variants follow four failure families: setup (re-authenticate), validation
/// (fix the input), transport (maybe retry), and protocol (upstream shape is
/// unusable). [`Error::kind`] maps each variant onto the envelope `type`.
#[derive(Error, Debug)]
pub enum Error {
    /// Credentials missing, invalid or expired
    #[error("Setup error: {0}")]
    Setup(String),

    /// Caller-supplied input violates a format, length or enum rule
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection-level failure (DNS, refused, reset)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single attempt exceeded the configured timeout
    #[error("Request timed out after {0} ms")]
    Timeout(u128),

    /// Upstream returned a non-success status
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// Upstream kept answering 429 after all retries
    #[error(
        "Rate limited by Codecks (about 40 requests per 5 seconds allowed); wait before retrying"
    )]
    RateLimited,

    /// Upstream returned a shape the adapter cannot use
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Lookup matched nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// A multi-step operation stopped after some steps took effect
    #[error("{completed}; then failed: {source}")]
    PartialFailure {
        /// What already happened upstream
        completed: String,
        /// The failure that stopped the operation
        #[source]
        source: Box<Error>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable category string used as `error_detail.type` in envelopes
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::Validation(_) => "validation",
            Self::Config(_) => "config",
            Self::Transport(_) | Self::Timeout(_) | Self::Http { .. } | Self::Io(_) => "transport",
            Self::RateLimited => "rate_limited",
            Self::Protocol(_) | Self::Json(_) => "protocol",
            Self::NotFound(_) => "not_found",
            Self::PartialFailure { source, .. } => source.kind(),
        }
    }

    /// Whether the failure class may succeed on a verbatim retry.
    ///
    /// Idempotency of the call itself is decided by the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }

    /// Shorthand for a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

/// HTTP statuses worth retrying for idempotent calls
pub const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_taxonomy() {
        assert_eq!(Error::Setup("x".into()).kind(), "setup");
        assert_eq!(Error::validation("x").kind(), "validation");
        assert_eq!(Error::Timeout(10).kind(), "transport");
        assert_eq!(Error::RateLimited.kind(), "rate_limited");
        assert_eq!(Error::protocol("x").kind(), "protocol");
    }

    #[test]
    fn partial_failure_reports_inner_kind() {
        let err = Error::PartialFailure {
            completed: "card archived".into(),
            source: Box::new(Error::Http {
                status: 500,
                body: "boom".into(),
            }),
        };
        assert_eq!(err.kind(), "transport");
        assert!(err.to_string().starts_with("card archived, but"));
    }

    #[test]
    fn retryable_statuses() {
        for status in [429, 502, 503, 504] {
            let err = Error::Http {
                status,
                body: String::new(),
            };
            assert!(err.is_retryable(), "{status} should retry");
        }
        let err = Error::Http {
            status: 500,
            body: String::new(),
        };
        assert!(!err.is_retryable());
        assert!(Error::Timeout(5).is_retryable());
        assert!(!Error::validation("bad").is_retryable());
    }
}
