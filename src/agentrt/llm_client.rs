//! Provider-agnostic LLM client abstraction.
//!
//! The runtime core never talks to a model vendor directly. Concrete
//! provider clients live outside this crate and implement [`LLMClient`];
//! the executor drives them through this trait and nothing else. The
//! supporting types describe sampling parameters, completed generations,
//! and token accounting.
//!
//! Implementations **must** be thread-safe (`Send + Sync`) so they can be
//! shared between async tasks, and **must** honor the cancellation token
//! passed to every call: a cancelled generation should return
//! [`RuntimeError::Cancelled`] promptly rather than running to completion.

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agentrt::callback::LLMCallback;
use crate::agentrt::error::RuntimeError;

/// How many tokens were spent on prompt vs. completion?
#[derive(Clone, Debug, Default)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: u64,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: u64,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: u64,
}

/// Sampling parameters forwarded to the provider with each generation.
///
/// Ranges are validated where these values originate (agent configuration),
/// not here — a client receives parameters that already passed validation.
#[derive(Clone, Debug)]
pub struct SamplingParams {
    /// Provider model identifier (e.g. `"gpt-4o"`).
    pub model: String,
    /// Sampling temperature, `0.0..=2.0`.
    pub temperature: f32,
    /// Nucleus sampling cutoff, `0.0..=1.0`.
    pub top_p: f32,
    /// Maximum tokens to generate, `>= 1`.
    pub max_tokens: u32,
    /// Frequency penalty, `-2.0..=2.0`.
    pub frequency_penalty: f32,
    /// Presence penalty, `-2.0..=2.0`.
    pub presence_penalty: f32,
    /// Sequences that terminate generation.
    pub stop_sequences: Vec<String>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 1024,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop_sequences: Vec::new(),
        }
    }
}

/// A completed generation with optional usage accounting.
#[derive(Clone, Debug)]
pub struct LLMResponse {
    /// The generated text.
    pub content: String,
    /// Token accounting, if the provider reported it.
    pub usage: Option<TokenUsage>,
}

/// Type alias for a stream of output fragments compatible with `Send`
/// executors.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, RuntimeError>> + Send>>;

/// Trait-driven abstraction over a concrete LLM provider.
///
/// The `callback` parameter, when supplied, receives streaming-protocol
/// notifications (tokens, tool-call boundaries, errors) as the provider
/// produces them; see [`CallbackHandler`](crate::callback::CallbackHandler)
/// for the runtime's standard sink.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Run a full request/response generation.
    ///
    /// Implementations should poll `cancel` at their I/O boundaries and
    /// return [`RuntimeError::Cancelled`] once it fires.
    async fn generate(
        &self,
        prompt: &str,
        params: &SamplingParams,
        callback: Option<Arc<dyn LLMCallback>>,
        cancel: &CancellationToken,
    ) -> Result<LLMResponse, RuntimeError>;

    /// Run a streaming generation, yielding output fragments as produced.
    ///
    /// Dropping the returned stream cancels the underlying call;
    /// implementations should additionally honor `cancel` so abandonment
    /// does not depend on the consumer polling.
    async fn generate_stream(
        &self,
        prompt: &str,
        params: &SamplingParams,
        callback: Option<Arc<dyn LLMCallback>>,
        cancel: &CancellationToken,
    ) -> Result<TokenStream, RuntimeError>;

    /// Identifier of the upstream model this client targets.
    fn model_name(&self) -> &str;

    /// Usage reported by the most recent [`generate`](LLMClient::generate)
    /// call, if the provider exposes billing information.
    async fn last_usage(&self) -> Option<TokenUsage> {
        None
    }
}
