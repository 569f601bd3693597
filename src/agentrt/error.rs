//! Runtime error taxonomy.
//!
//! Every fallible operation in the runtime core returns [`RuntimeError`].
//! Each variant maps one-to-one onto a machine-readable error-type token
//! (see [`RuntimeError::error_type`]) that is carried in failed
//! [`AgentResult`](crate::context::AgentResult) metadata and in
//! [`Event`](crate::event::Event) records, so external surfaces can react
//! to failures without parsing display strings.
//!
//! The taxonomy splits three ways:
//!
//! - **User-caused** — bad input, missing credentials, exhausted quota.
//!   Never retried.
//! - **Transient/system** — timeouts, provider hiccups, store outages.
//!   Retried by the executor per its retry policy.
//! - **Programmer/control** — middleware faults, invalid configuration,
//!   cancellation. Never retried.
//!
//! # Example
//!
//! ```rust
//! use agentrt::error::RuntimeError;
//!
//! let err = RuntimeError::LlmRateLimited("429 from provider".into());
//! assert_eq!(err.error_type(), "LLM_RATE_LIMITED");
//! assert!(err.is_retryable());
//!
//! let err = RuntimeError::Cancelled;
//! assert!(!err.is_retryable());
//! ```

use thiserror::Error;

/// Unified error type for the agent runtime core.
///
/// Variants mirror the runtime's error-token taxonomy. Use
/// [`error_type`](RuntimeError::error_type) for the wire token,
/// [`is_retryable`](RuntimeError::is_retryable) for the retry decision, and
/// [`public_message`](RuntimeError::public_message) for text that is safe to
/// surface to end users.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// A request failed input validation (empty task, malformed ids, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced session does not exist (and never did, or was deleted).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The session existed but its TTL elapsed before the operation committed.
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// A resource ceiling was hit (e.g. the global session maximum).
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The caller could not be authenticated.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The caller is authenticated but not allowed to perform the operation.
    #[error("authorization failed: {0}")]
    AuthorizationFailed(String),

    /// The caller exceeded a request-rate limit enforced by the runtime.
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// The request did not complete within its configured budget.
    #[error("agent execution timed out after {0} ms")]
    AgentTimeout(u64),

    /// The request was cancelled cooperatively.
    #[error("execution cancelled")]
    Cancelled,

    /// The upstream LLM provider returned an error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// The upstream LLM provider throttled the request.
    #[error("LLM rate limited: {0}")]
    LlmRateLimited(String),

    /// A network-level failure talking to an external collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// The session store failed.
    #[error("store error: {0}")]
    Store(String),

    /// A middleware returned an error (or misbehaved structurally).
    #[error("middleware '{name}' failed: {message}")]
    Middleware {
        /// Name of the offending middleware.
        name: String,
        /// What went wrong.
        message: String,
    },

    /// A configuration value was out of range or structurally invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A failure that does not fit any other bucket.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// The machine-readable token for this error, from the runtime's closed
    /// taxonomy. Stable across releases; suitable for persistence and for
    /// `metadata["error_type"]` on failed results.
    pub fn error_type(&self) -> &'static str {
        match self {
            RuntimeError::Validation(_) => "VALIDATION_ERROR",
            RuntimeError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            RuntimeError::SessionExpired(_) => "SESSION_EXPIRED",
            RuntimeError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            RuntimeError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            RuntimeError::AuthorizationFailed(_) => "AUTHORIZATION_FAILED",
            RuntimeError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            RuntimeError::AgentTimeout(_) => "AGENT_TIMEOUT",
            RuntimeError::Cancelled => "CANCELLED",
            RuntimeError::LlmApi(_) => "LLM_API_ERROR",
            RuntimeError::LlmRateLimited(_) => "LLM_RATE_LIMITED",
            RuntimeError::Network(_) => "NETWORK_ERROR",
            RuntimeError::Store(_) => "STORE_ERROR",
            RuntimeError::Middleware { .. } => "MIDDLEWARE_ERROR",
            RuntimeError::Config(_) => "CONFIG_ERROR",
            RuntimeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the executor may retry a request that failed with this error.
    ///
    /// Only transient/system failures qualify. Cancellation and timeout are
    /// explicitly excluded: a timed-out request has exhausted its budget and
    /// a cancelled one must stop.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RuntimeError::LlmApi(_)
                | RuntimeError::LlmRateLimited(_)
                | RuntimeError::Network(_)
                | RuntimeError::Store(_)
        )
    }

    /// Whether a retryable *token* (as stored in result metadata) names a
    /// retryable error. `AGENT_TIMEOUT` is retryable as a classification of
    /// an inner operation, but a request-level timeout is terminal — the
    /// executor enforces that distinction against its deadline.
    pub fn token_is_retryable(token: &str) -> bool {
        matches!(
            token,
            "AGENT_TIMEOUT" | "LLM_API_ERROR" | "LLM_RATE_LIMITED" | "NETWORK_ERROR" | "STORE_ERROR"
        )
    }

    /// Whether the error was caused by the caller rather than the system.
    pub fn is_user_caused(&self) -> bool {
        matches!(
            self,
            RuntimeError::Validation(_)
                | RuntimeError::AuthenticationFailed(_)
                | RuntimeError::AuthorizationFailed(_)
                | RuntimeError::RateLimitExceeded(_)
                | RuntimeError::QuotaExceeded(_)
        )
    }

    /// Human-readable text safe to expose outside the process.
    ///
    /// Internal and store failures are redacted; their full detail goes to
    /// the logs at the point of failure.
    pub fn public_message(&self) -> String {
        match self {
            RuntimeError::Internal(_) => "an internal error occurred".to_string(),
            RuntimeError::Store(_) => "a storage error occurred".to_string(),
            other => other.to_string(),
        }
    }

    /// All tokens in the closed taxonomy, for validation and iteration.
    pub const ALL_TOKENS: &'static [&'static str] = &[
        "VALIDATION_ERROR",
        "SESSION_NOT_FOUND",
        "SESSION_EXPIRED",
        "QUOTA_EXCEEDED",
        "AUTHENTICATION_FAILED",
        "AUTHORIZATION_FAILED",
        "RATE_LIMIT_EXCEEDED",
        "AGENT_TIMEOUT",
        "CANCELLED",
        "LLM_API_ERROR",
        "LLM_RATE_LIMITED",
        "NETWORK_ERROR",
        "STORE_ERROR",
        "MIDDLEWARE_ERROR",
        "CONFIG_ERROR",
        "INTERNAL_ERROR",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_tokens_are_in_taxonomy() {
        let samples = vec![
            RuntimeError::Validation("x".into()),
            RuntimeError::SessionNotFound("s".into()),
            RuntimeError::SessionExpired("s".into()),
            RuntimeError::QuotaExceeded("q".into()),
            RuntimeError::AuthenticationFailed("a".into()),
            RuntimeError::AuthorizationFailed("a".into()),
            RuntimeError::RateLimitExceeded("r".into()),
            RuntimeError::AgentTimeout(100),
            RuntimeError::Cancelled,
            RuntimeError::LlmApi("l".into()),
            RuntimeError::LlmRateLimited("l".into()),
            RuntimeError::Network("n".into()),
            RuntimeError::Store("s".into()),
            RuntimeError::Middleware {
                name: "m".into(),
                message: "boom".into(),
            },
            RuntimeError::Config("c".into()),
            RuntimeError::Internal("i".into()),
        ];
        for err in samples {
            assert!(RuntimeError::ALL_TOKENS.contains(&err.error_type()));
        }
    }

    #[test]
    fn test_retry_policy() {
        assert!(RuntimeError::LlmApi("x".into()).is_retryable());
        assert!(RuntimeError::Store("x".into()).is_retryable());
        assert!(!RuntimeError::Cancelled.is_retryable());
        assert!(!RuntimeError::Validation("x".into()).is_retryable());
        assert!(!RuntimeError::AgentTimeout(10).is_retryable());
        assert!(RuntimeError::token_is_retryable("AGENT_TIMEOUT"));
        assert!(!RuntimeError::token_is_retryable("CANCELLED"));
    }

    #[test]
    fn test_public_message_redacts_internal_detail() {
        let err = RuntimeError::Internal("connection string leaked".into());
        assert!(!err.public_message().contains("connection string"));
        let err = RuntimeError::Store("redis://secret@host".into());
        assert!(!err.public_message().contains("secret"));
    }
}
