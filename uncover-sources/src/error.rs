//! Error types for the uncover-sources crate.
//!
//! All errors use stable string messages suitable for display to users
//! and programmatic handling. No API keys or sensitive data appear in
//! error messages; request URLs that embed secrets are never formatted
//! into an error.
//!
//! [`SourceError`] is `Clone` because a failure is also a value: adapters
//! carry mid-stream failures inside [`crate::types::ReconResult::error`]
//! instead of closing their stream.

use crate::ratelimit::RateLimitError;

/// Errors that can occur while orchestrating or querying sources.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Invalid configuration or source selection.
    #[error("config error: {0}")]
    Config(String),

    /// The requested sources need credentials but none are configured.
    #[error("sources {0} require keys but no keys were found")]
    MissingKeys(String),

    /// Every requested source is destructive; the run is refused.
    #[error("destructive sources {0} cannot be run on their own")]
    DestructiveOnly(String),

    /// A source needs credentials that are absent (pre-flight failure).
    #[error("empty {0} keys")]
    Credentials(String),

    /// A transport-level HTTP failure (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    /// A source answered with an unexpected, non-success status.
    #[error("unexpected status code {status} received from {source_name}")]
    Status {
        /// Source that produced the response.
        source_name: String,
        /// HTTP status code.
        status: u16,
    },

    /// A source signalled rate limiting (HTTP 429); the whole source should
    /// back off rather than be treated as exhausted.
    #[error("rate limited by {0}, back off before retrying")]
    RateLimited(String),

    /// A provider answered 200 but reported an error in its payload.
    #[error("{source_name} returned an error: {message}")]
    Provider {
        /// Source that reported the error.
        source_name: String,
        /// Provider-supplied message.
        message: String,
    },

    /// Failed to parse a provider response.
    #[error("parse error: {0}")]
    Parse(String),

    /// Admission through the rate limiter failed.
    #[error(transparent)]
    Limiter(#[from] RateLimitError),
}

impl SourceError {
    /// Returns `true` when this error signals provider-side rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Convenience type alias for uncover-sources results.
pub type Result<T> = std::result::Result<T, SourceError>;
