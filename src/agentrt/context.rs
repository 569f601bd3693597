//! Shared per-request primitives.
//!
//! [`AgentContext`] is the immutable-identity input that travels inward
//! through the middleware chain to the LLM handler; [`AgentResult`] is the
//! output that travels back out. Both carry a free-form `metadata` map
//! (string → JSON value) for per-request extensibility — auth tokens, trace
//! ids, model overrides, middleware annotations.
//!
//! # Example
//!
//! ```rust
//! use agentrt::context::{AgentContext, AgentResult};
//!
//! let ctx = AgentContext::new("support-bot", "user-42", "sess_abc", "Summarize my tickets")
//!     .with_metadata("trace_id", serde_json::json!("trace-123"));
//!
//! assert_eq!(ctx.agent_id, "support-bot");
//! assert_eq!(ctx.trace_id(), Some("trace-123".to_string()));
//!
//! let result = AgentResult::ok("Here is your summary.").with_tokens_used(250);
//! assert!(result.success);
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::agentrt::error::RuntimeError;

/// Per-request input to the executor and middleware chain.
///
/// Identity fields (`agent_id`, `user_id`, `session_id`) are set at
/// construction and are read-only by convention — middlewares extend the
/// request by adding to [`metadata`](AgentContext::metadata), not by
/// rewriting who the request is for.
///
/// The embedded [`CancellationToken`] is the cooperative-cancellation signal
/// for the whole request: the executor, the pipeline, and well-behaved LLM
/// clients consult it at every suspension point. Cloning the context clones
/// the token handle, so all copies observe the same cancellation.
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// Which agent configuration this request targets.
    pub agent_id: String,
    /// The end user on whose behalf the request runs.
    pub user_id: String,
    /// The durable session this request belongs to.
    pub session_id: String,
    /// The task to perform. Must be non-empty.
    pub task: String,
    /// Free-form per-request extensions (auth token, trace id, model
    /// overrides, loaded memory, middleware annotations).
    pub metadata: HashMap<String, Value>,
    /// When the context was created.
    pub created_at: DateTime<Utc>,
    /// Cooperative cancellation signal for this request.
    pub cancel: CancellationToken,
}

impl AgentContext {
    /// Create a context with the mandatory identity fields and task.
    pub fn new(
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        task: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            task: task.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach an externally owned cancellation token (builder pattern).
    ///
    /// Use this when the caller wants to cancel the request from outside,
    /// e.g. when an RPC connection drops.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The caller-supplied trace id, if any.
    pub fn trace_id(&self) -> Option<String> {
        self.metadata
            .get("trace_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// Check the mandatory fields. Identity ids and the task must be
    /// non-empty (after trimming).
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.agent_id.trim().is_empty() {
            return Err(RuntimeError::Validation("agent_id must not be empty".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(RuntimeError::Validation("user_id must not be empty".into()));
        }
        if self.session_id.trim().is_empty() {
            return Err(RuntimeError::Validation(
                "session_id must not be empty".into(),
            ));
        }
        if self.task.trim().is_empty() {
            return Err(RuntimeError::Validation("task must not be empty".into()));
        }
        Ok(())
    }
}

/// Per-request output of the executor and middleware chain.
///
/// A failed result always carries a non-empty `error` string and a
/// `metadata["error_type"]` token from the runtime taxonomy, so callers can
/// branch on the machine token while logging the human text.
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// Whether the request succeeded.
    pub success: bool,
    /// The agent's output text. Empty on failure.
    pub output: String,
    /// Human-readable failure description. Empty on success.
    pub error: String,
    /// Free-form result annotations (`error_type`, middleware marks,
    /// provider hints).
    pub metadata: HashMap<String, Value>,
    /// Total tokens billed across LLM round-trips for this request.
    pub tokens_used: u64,
    /// Wall-clock duration of the request in milliseconds.
    pub execution_time_ms: u64,
}

impl AgentResult {
    /// A successful result with the given output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: String::new(),
            metadata: HashMap::new(),
            tokens_used: 0,
            execution_time_ms: 0,
        }
    }

    /// A failed result with an explicit error-type token and message.
    ///
    /// Prefer [`from_error`](AgentResult::from_error) when a
    /// [`RuntimeError`] is at hand; this constructor exists for middlewares
    /// that synthesize failures without an error value.
    pub fn failure(error_type: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut metadata = HashMap::new();
        metadata.insert("error_type".to_string(), Value::String(error_type.into()));
        Self {
            success: false,
            output: String::new(),
            error: message,
            metadata,
            tokens_used: 0,
            execution_time_ms: 0,
        }
    }

    /// A failed result derived from a [`RuntimeError`].
    ///
    /// The user-visible `error` text comes from
    /// [`public_message`](RuntimeError::public_message), so internal and
    /// store detail never leaks past the process boundary.
    pub fn from_error(err: &RuntimeError) -> Self {
        Self::failure(err.error_type(), err.public_message())
    }

    /// Set the billed token count (builder pattern).
    pub fn with_tokens_used(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The `error_type` token carried in metadata, if any.
    pub fn error_type(&self) -> Option<&str> {
        self.metadata.get("error_type").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_validation() {
        let ctx = AgentContext::new("a", "u", "s", "do the thing");
        assert!(ctx.validate().is_ok());

        let ctx = AgentContext::new("a", "u", "s", "   ");
        let err = ctx.validate().unwrap_err();
        assert_eq!(err.error_type(), "VALIDATION_ERROR");

        let ctx = AgentContext::new("", "u", "s", "task");
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn test_failed_result_carries_error_type() {
        let result = AgentResult::from_error(&RuntimeError::LlmApi("boom".into()));
        assert!(!result.success);
        assert!(!result.error.is_empty());
        assert_eq!(result.error_type(), Some("LLM_API_ERROR"));
    }

    #[test]
    fn test_cancellation_is_shared_across_clones() {
        let ctx = AgentContext::new("a", "u", "s", "t");
        let clone = ctx.clone();
        ctx.cancel.cancel();
        assert!(clone.cancel.is_cancelled());
    }
}
