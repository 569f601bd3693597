//! Streaming LLM callback adaptation.
//!
//! LLM clients drive the [`LLMCallback`] trait as they stream: tokens,
//! tool-call boundaries, chain boundaries, and mid-stream errors.
//! [`CallbackHandler`] is the runtime's standard sink. It fans each
//! notification into two places:
//!
//! - the [`EventBus`], as `LLM_TOKEN`, `LLM_TOOL_CALL_START`,
//!   `LLM_TOOL_CALL_END`, and `LLM_ERROR` events stamped with the bound
//!   context's agent, session, and trace ids (chain boundaries are
//!   buffer-only — they have no bus event type);
//! - an in-memory FIFO ring of the last N callback records (default 1000)
//!   for debugging, bounded regardless of stream length.
//!
//! The handler is safe to attach to long-running streams: it holds no
//! per-token allocations beyond the ring and is `Send + Sync`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::agentrt::context::AgentContext;
use crate::agentrt::event::{Event, EventBus, EventType};

/// Default ring capacity.
pub const DEFAULT_CALLBACK_CAPACITY: usize = 1000;

/// One retained callback notification.
#[derive(Debug, Clone)]
pub enum CallbackRecord {
    /// A streamed output token.
    Token {
        /// The token text.
        text: String,
        /// When it arrived.
        at: DateTime<Utc>,
    },
    /// A tool call began.
    ToolCallStart {
        /// Tool name.
        tool: String,
        /// When it began.
        at: DateTime<Utc>,
    },
    /// A tool call finished.
    ToolCallEnd {
        /// Tool name.
        tool: String,
        /// Whether it succeeded.
        success: bool,
        /// Failure detail, when unsuccessful.
        error: Option<String>,
        /// When it finished.
        at: DateTime<Utc>,
    },
    /// A chain (multi-step generation) began.
    ChainStart {
        /// Chain label.
        label: String,
        /// When it began.
        at: DateTime<Utc>,
    },
    /// A chain finished.
    ChainEnd {
        /// Chain label.
        label: String,
        /// When it finished.
        at: DateTime<Utc>,
    },
    /// The provider reported a mid-stream error.
    Error {
        /// Error text.
        message: String,
        /// When it was reported.
        at: DateTime<Utc>,
    },
}

/// Sink for streaming-protocol notifications from an LLM client.
///
/// Every method has a default no-op implementation, so clients and test
/// doubles override only what they produce.
#[async_trait]
pub trait LLMCallback: Send + Sync {
    /// A streamed output token was produced.
    async fn on_token(&self, _token: &str) {}

    /// The model began a tool call.
    async fn on_tool_call_start(&self, _tool: &str) {}

    /// The model finished a tool call.
    async fn on_tool_call_end(&self, _tool: &str, _success: bool, _error: Option<&str>) {}

    /// A multi-step chain began.
    async fn on_chain_start(&self, _label: &str) {}

    /// A multi-step chain finished.
    async fn on_chain_end(&self, _label: &str) {}

    /// The provider reported an error mid-stream.
    async fn on_error(&self, _message: &str) {}
}

/// Adapts [`LLMCallback`] notifications into bus events and a bounded
/// debugging ring. See the module docs.
pub struct CallbackHandler {
    agent_id: String,
    user_id: Option<String>,
    session_id: Option<String>,
    trace_id: Option<String>,
    bus: Option<Arc<EventBus>>,
    records: Mutex<VecDeque<CallbackRecord>>,
    capacity: usize,
}

impl CallbackHandler {
    /// Create a handler bound to nothing but an agent id.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: None,
            session_id: None,
            trace_id: None,
            bus: None,
            records: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_CALLBACK_CAPACITY,
        }
    }

    /// Create a handler stamped with a request context's identity fields.
    pub fn for_context(ctx: &AgentContext) -> Self {
        Self {
            agent_id: ctx.agent_id.clone(),
            user_id: Some(ctx.user_id.clone()),
            session_id: Some(ctx.session_id.clone()),
            trace_id: ctx.trace_id(),
            bus: None,
            records: Mutex::new(VecDeque::new()),
            capacity: DEFAULT_CALLBACK_CAPACITY,
        }
    }

    /// Attach the event bus sink (builder pattern).
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the ring capacity (builder pattern). A capacity of 0
    /// disables retention.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Snapshot of the retained records, oldest first.
    pub fn records(&self) -> Vec<CallbackRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Number of currently retained records (bounded by the capacity).
    pub fn record_count(&self) -> usize {
        self.lock().len()
    }

    fn push(&self, record: CallbackRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<CallbackRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn event(&self, event_type: EventType) -> Event {
        let mut event = Event::new(event_type, &self.agent_id).with_trace(self.trace_id.clone());
        if let Some(user_id) = &self.user_id {
            event = event.with_user(user_id);
        }
        if let Some(session_id) = &self.session_id {
            event = event.with_session(session_id);
        }
        event
    }

    async fn publish(&self, event: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(event).await;
        }
    }
}

#[async_trait]
impl LLMCallback for CallbackHandler {
    async fn on_token(&self, token: &str) {
        self.push(CallbackRecord::Token {
            text: token.to_string(),
            at: Utc::now(),
        });
        self.publish(
            self.event(EventType::LlmToken)
                .with_metadata("token", Value::String(token.to_string())),
        )
        .await;
    }

    async fn on_tool_call_start(&self, tool: &str) {
        self.push(CallbackRecord::ToolCallStart {
            tool: tool.to_string(),
            at: Utc::now(),
        });
        self.publish(
            self.event(EventType::LlmToolCallStart)
                .with_metadata("tool", Value::String(tool.to_string())),
        )
        .await;
    }

    async fn on_tool_call_end(&self, tool: &str, success: bool, error: Option<&str>) {
        self.push(CallbackRecord::ToolCallEnd {
            tool: tool.to_string(),
            success,
            error: error.map(|e| e.to_string()),
            at: Utc::now(),
        });
        let mut event = self
            .event(EventType::LlmToolCallEnd)
            .with_metadata("tool", Value::String(tool.to_string()))
            .with_metadata("success", Value::Bool(success));
        if let Some(error) = error {
            event = event.with_error("LLM_API_ERROR", error);
        }
        self.publish(event).await;
    }

    async fn on_chain_start(&self, label: &str) {
        self.push(CallbackRecord::ChainStart {
            label: label.to_string(),
            at: Utc::now(),
        });
    }

    async fn on_chain_end(&self, label: &str) {
        self.push(CallbackRecord::ChainEnd {
            label: label.to_string(),
            at: Utc::now(),
        });
    }

    async fn on_error(&self, message: &str) {
        self.push(CallbackRecord::Error {
            message: message.to_string(),
            at: Utc::now(),
        });
        self.publish(
            self.event(EventType::LlmError)
                .with_error("LLM_API_ERROR", message),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ring_buffer_is_bounded_fifo() {
        let handler = CallbackHandler::new("a").with_capacity(3);
        for i in 0..5 {
            handler.on_token(&format!("t{}", i)).await;
        }
        let records = handler.records();
        assert_eq!(records.len(), 3);
        match &records[0] {
            CallbackRecord::Token { text, .. } => assert_eq!(text, "t2"),
            other => panic!("unexpected record: {:?}", other),
        }
        assert_eq!(handler.record_count(), 3);
    }

    #[tokio::test]
    async fn test_chain_events_are_buffer_only() {
        let bus = Arc::new(EventBus::new());
        let handler = CallbackHandler::new("a").with_event_bus(bus.clone());
        handler.on_chain_start("plan").await;
        handler.on_chain_end("plan").await;
        handler.on_token("x").await;

        assert_eq!(handler.record_count(), 3);
        // Only the token reached the bus.
        assert_eq!(bus.history().len(), 1);
        assert_eq!(bus.history()[0].event_type, EventType::LlmToken);
    }
}
