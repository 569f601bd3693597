//! Runtime event system.
//!
//! Provides the in-process publish/subscribe layer every other subsystem
//! reports into: the executor publishes request lifecycle events, the
//! session manager publishes session and checkpoint events, the middleware
//! pipeline publishes per-middleware completions, and the callback handler
//! relays streaming LLM activity.
//!
//! # Delivery model
//!
//! - `publish` appends the event to a bounded, ring-buffered history and
//!   dispatches to every matching subscription before returning. It never
//!   fails; the returned integer counts handlers that completed
//!   successfully.
//! - Handlers run concurrently in their own tasks, bounded by a semaphore
//!   (`max_concurrent_handlers` in-flight per bus). One handler's error or
//!   panic never prevents siblings from being attempted.
//! - A handler that exceeds the per-handler timeout is *abandoned*: its
//!   task keeps running, its result is ignored, and it does not count as
//!   delivered.
//! - Because a publisher awaits dispatch before publishing its next event,
//!   events from one publisher reach any single subscription in publication
//!   order. No order is promised across subscriptions.
//!
//! # Example
//!
//! ```rust
//! use agentrt::event::{Event, EventBus, EventHandler, EventType};
//! use agentrt::error::RuntimeError;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! #[async_trait]
//! impl EventHandler for Counter {
//!     async fn handle_event(&self, _event: &Event) -> Result<(), RuntimeError> {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = EventBus::new();
//! let counter = Arc::new(Counter(AtomicUsize::new(0)));
//! bus.subscribe(EventType::AgentCompleted, counter.clone()).await;
//!
//! let delivered = bus
//!     .publish(Event::new(EventType::AgentCompleted, "support-bot"))
//!     .await;
//! assert_eq!(delivered, 1);
//! assert_eq!(counter.0.load(Ordering::SeqCst), 1);
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{RwLock, Semaphore};
use uuid::Uuid;

use crate::agentrt::config::EventBusConfig;
use crate::agentrt::error::RuntimeError;

/// Closed enumeration of runtime event types.
///
/// `Any` is a *subscription* sentinel: a subscription registered with
/// `Any` receives every published event. It is not meant to be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A request entered the executor.
    AgentStarted,
    /// A request completed successfully.
    AgentCompleted,
    /// The executor is about to re-run a failed attempt.
    RetryAttempted,
    /// A request failed terminally.
    ErrorOccurred,
    /// A session was created.
    SessionCreated,
    /// A session's TTL elapsed and it was removed (lazily or by sweep).
    SessionExpired,
    /// A session was deleted explicitly.
    SessionDeleted,
    /// A checkpoint was saved.
    CheckpointSaved,
    /// A checkpoint was restored.
    CheckpointRestored,
    /// A middleware finished processing a request.
    MiddlewareExecuted,
    /// A middleware failed while processing a request.
    MiddlewareFailed,
    /// The LLM produced a streaming token.
    LlmToken,
    /// The LLM began a tool call.
    LlmToolCallStart,
    /// The LLM finished a tool call.
    LlmToolCallEnd,
    /// The LLM reported an error mid-stream.
    LlmError,
    /// Application-defined event.
    Custom,
    /// Wildcard subscription sentinel — matches every published event.
    Any,
}

impl EventType {
    /// The wire token for this event type (e.g. `"AGENT_STARTED"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentStarted => "AGENT_STARTED",
            EventType::AgentCompleted => "AGENT_COMPLETED",
            EventType::RetryAttempted => "RETRY_ATTEMPTED",
            EventType::ErrorOccurred => "ERROR_OCCURRED",
            EventType::SessionCreated => "SESSION_CREATED",
            EventType::SessionExpired => "SESSION_EXPIRED",
            EventType::SessionDeleted => "SESSION_DELETED",
            EventType::CheckpointSaved => "CHECKPOINT_SAVED",
            EventType::CheckpointRestored => "CHECKPOINT_RESTORED",
            EventType::MiddlewareExecuted => "MIDDLEWARE_EXECUTED",
            EventType::MiddlewareFailed => "MIDDLEWARE_FAILED",
            EventType::LlmToken => "LLM_TOKEN",
            EventType::LlmToolCallStart => "LLM_TOOL_CALL_START",
            EventType::LlmToolCallEnd => "LLM_TOOL_CALL_END",
            EventType::LlmError => "LLM_ERROR",
            EventType::Custom => "CUSTOM",
            EventType::Any => "ANY",
        }
    }
}

/// A single runtime event.
///
/// Construction is builder-style; only the event type and the agent id are
/// mandatory. Everything else is attached where the emitting site knows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub event_type: EventType,
    /// The agent this event concerns.
    pub agent_id: String,
    /// The end user, where known.
    pub user_id: Option<String>,
    /// The session, where known.
    pub session_id: Option<String>,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Free-form annotations (middleware name, attempt index, token text, ...).
    pub metadata: HashMap<String, Value>,
    /// Request duration, on completion-shaped events.
    pub execution_time_ms: Option<u64>,
    /// Human-readable failure text, on error-shaped events.
    pub error_message: Option<String>,
    /// Machine token from the runtime taxonomy, on error-shaped events.
    pub error_type: Option<String>,
    /// Caller-supplied correlator for distributed log stitching.
    pub trace_id: Option<String>,
}

impl Event {
    /// Create an event with the mandatory fields; everything else defaults
    /// to absent.
    pub fn new(event_type: EventType, agent_id: impl Into<String>) -> Self {
        Self {
            event_type,
            agent_id: agent_id.into(),
            user_id: None,
            session_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            execution_time_ms: None,
            error_message: None,
            error_type: None,
            trace_id: None,
        }
    }

    /// Attach the end user id (builder pattern).
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the session id (builder pattern).
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach the request duration (builder pattern).
    pub fn with_execution_time(mut self, millis: u64) -> Self {
        self.execution_time_ms = Some(millis);
        self
    }

    /// Attach failure detail (builder pattern).
    pub fn with_error(mut self, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self.error_message = Some(message.into());
        self
    }

    /// Attach the trace correlator (builder pattern).
    pub fn with_trace(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }
}

/// Trait for receiving events from an [`EventBus`].
///
/// Implementations must be `Send + Sync` — the bus shares them across
/// dispatch tasks via `Arc<dyn EventHandler>`. A returned `Err` is logged
/// and counted as a delivery failure; it never affects sibling handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called once per matching published event.
    async fn handle_event(&self, event: &Event) -> Result<(), RuntimeError>;
}

/// Opaque identifier of one subscription.
pub type SubscriptionId = String;

struct Subscription {
    id: SubscriptionId,
    event_type: EventType,
    handler: Arc<dyn EventHandler>,
}

/// In-process publish/subscribe bus with bounded history.
///
/// See the module docs for the delivery model. A process-wide default bus
/// is available via [`EventBus::global`]; prefer injecting a bus and use
/// the global only at composition roots.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    history: Mutex<VecDeque<Event>>,
    dispatch_permits: Arc<Semaphore>,
    config: EventBusConfig,
    closed: AtomicBool,
}

lazy_static! {
    static ref GLOBAL_BUS: Arc<EventBus> = Arc::new(EventBus::new());
}

impl EventBus {
    /// Create a bus with default settings.
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a bus with explicit settings.
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(config.max_history.min(1024))),
            dispatch_permits: Arc::new(Semaphore::new(config.max_concurrent_handlers.max(1))),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// The process-wide default bus.
    ///
    /// Acquire explicitly; pair with [`shutdown`](EventBus::shutdown) at
    /// process teardown if your embedder needs deterministic cleanup.
    pub fn global() -> Arc<EventBus> {
        GLOBAL_BUS.clone()
    }

    // ── Subscription management ──────────────────────────────────────────

    /// Register a handler for `event_type` (or [`EventType::Any`] for every
    /// event). Returns the subscription id for later removal.
    pub async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = Uuid::new_v4().to_string();
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.push(Subscription {
            id: id.clone(),
            event_type,
            handler,
        });
        id
    }

    /// Remove one subscription by id. Returns whether it existed.
    pub async fn unsubscribe(&self, id: &str) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Remove every subscription bound to `handler` (pointer identity).
    /// Returns the number removed.
    pub async fn unsubscribe_handler(&self, handler: &Arc<dyn EventHandler>) -> usize {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| !Arc::ptr_eq(&s.handler, handler));
        before - subscriptions.len()
    }

    /// Remove all subscriptions. In-flight dispatches are unaffected.
    pub async fn clear(&self) {
        self.subscriptions.write().await.clear();
    }

    /// Number of subscriptions. With `Some(event_type)`, counts exact
    /// matches only (an `Any` subscription is counted under `Any`, not
    /// under every type it receives). With `None`, counts everything.
    pub async fn subscriber_count(&self, event_type: Option<EventType>) -> usize {
        let subscriptions = self.subscriptions.read().await;
        match event_type {
            Some(t) => subscriptions.iter().filter(|s| s.event_type == t).count(),
            None => subscriptions.len(),
        }
    }

    // ── Publication ──────────────────────────────────────────────────────

    /// Publish one event: append it to history, dispatch to every matching
    /// subscription, and return the number of handlers that completed
    /// successfully.
    ///
    /// Never fails. Returns 0 after [`shutdown`](EventBus::shutdown).
    pub async fn publish(&self, event: Event) -> usize {
        if self.closed.load(Ordering::Acquire) {
            debug!(
                "dropping {} event published after bus shutdown",
                event.event_type.as_str()
            );
            return 0;
        }

        self.push_history(event.clone());

        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|s| {
                    s.event_type == EventType::Any || s.event_type == event.event_type
                })
                .map(|s| s.handler.clone())
                .collect()
        };
        if handlers.is_empty() {
            return 0;
        }

        let event = Arc::new(event);
        let mut dispatches = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let event = Arc::clone(&event);
            let permits = Arc::clone(&self.dispatch_permits);
            let budget = self.config.handler_timeout;
            // One task per handler: failure and panic isolation, off the
            // publisher's critical path.
            dispatches.push(tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return false,
                };
                let work = {
                    let event = Arc::clone(&event);
                    tokio::spawn(async move { handler.handle_event(&event).await })
                };
                match tokio::time::timeout(budget, work).await {
                    Ok(Ok(Ok(()))) => true,
                    Ok(Ok(Err(err))) => {
                        warn!(
                            "event handler failed for {}: {}",
                            event.event_type.as_str(),
                            err
                        );
                        false
                    }
                    Ok(Err(join_err)) => {
                        warn!(
                            "event handler panicked for {}: {}",
                            event.event_type.as_str(),
                            join_err
                        );
                        false
                    }
                    Err(_) => {
                        // Abandon: the handler task keeps running, its
                        // result is ignored.
                        warn!(
                            "event handler exceeded {:?} for {}, abandoning",
                            budget,
                            event.event_type.as_str()
                        );
                        false
                    }
                }
            }));
        }

        let mut delivered = 0;
        for dispatch in dispatches {
            if let Ok(true) = dispatch.await {
                delivered += 1;
            }
        }
        delivered
    }

    // ── History ──────────────────────────────────────────────────────────

    /// The retained event history, oldest first.
    pub fn history(&self) -> Vec<Event> {
        let history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.iter().cloned().collect()
    }

    /// The most recent events of one type, newest first, at most `limit`.
    pub fn recent(&self, event_type: EventType, limit: usize) -> Vec<Event> {
        let history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history
            .iter()
            .rev()
            .filter(|e| e.event_type == event_type)
            .take(limit)
            .cloned()
            .collect()
    }

    fn push_history(&self, event: Event) {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.config.max_history == 0 {
            return;
        }
        while history.len() >= self.config.max_history {
            history.pop_front();
        }
        history.push_back(event);
    }

    // ── Shutdown ─────────────────────────────────────────────────────────

    /// Shut the bus down: remove all subscriptions, drain the history, and
    /// drop subsequent publishes. In-flight dispatches run to completion
    /// (or abandonment) on their own tasks.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.clear().await;
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
