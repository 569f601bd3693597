//! Per-request orchestration.
//!
//! [`AgentExecutor`] is where the runtime's subsystems meet: a request is
//! validated, announced on the event bus, enriched with session memory,
//! pushed through the middleware onion into the LLM/tool handler, retried
//! on transient failures under a single monotonic deadline, and finally
//! accounted for in metrics and events — all under a cooperative
//! cancellation contract.
//!
//! Dependencies are injected and individually optional; a missing
//! collaborator degrades the matching feature rather than failing the
//! request (no bus → no events, no metrics → no accounting, no session
//! manager → no memory weave, no pipeline → the handler runs bare). The
//! one exception is the LLM client: without it the handler fails with
//! `CONFIG_ERROR`.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentrt::context::AgentContext;
//! use agentrt::executor::AgentExecutor;
//! use agentrt::factory::AgentConfig;
//!
//! # async fn run(llm: std::sync::Arc<dyn agentrt::llm_client::LLMClient>) {
//! let executor = AgentExecutor::new(AgentConfig::new("helper", "gpt-4o"))
//!     .with_llm_client(llm);
//!
//! let result = executor
//!     .execute(AgentContext::new("helper", "user-1", "sess_x", "Say hello"))
//!     .await;
//! println!("{}", result.output);
//! # }
//! ```

use async_stream::stream;
use futures_util::stream::StreamExt;
use log::{debug, warn};
use serde_json::Value;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::agentrt::callback::{CallbackHandler, LLMCallback};
use crate::agentrt::config::ExecutorConfig;
use crate::agentrt::context::{AgentContext, AgentResult};
use crate::agentrt::error::RuntimeError;
use crate::agentrt::event::{Event, EventBus, EventType};
use crate::agentrt::factory::AgentConfig;
use crate::agentrt::llm_client::{LLMClient, SamplingParams};
use crate::agentrt::memory::{CheckpointMemory, MemoryProvider};
use crate::agentrt::metrics::MetricsCollector;
use crate::agentrt::middleware::{Handler, MiddlewarePipeline, MiddlewareResult};
use crate::agentrt::session::SessionPatch;
use crate::agentrt::session_manager::SessionManager;
use crate::agentrt::tool::{parse_tool_call, ToolRegistry};

/// Follow-up LLM calls allowed per request when the model keeps asking for
/// tools.
const MAX_TOOL_ITERATIONS: usize = 5;

/// Lazily produced stream of output fragments from
/// [`AgentExecutor::execute_stream`].
pub type AgentStream = Pin<Box<dyn futures_util::Stream<Item = Result<String, RuntimeError>> + Send>>;

/// Observable phase of the most recent request. Purely informational — the
/// executor accepts new requests in any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// No request has run, or the last one finished and was observed.
    Idle,
    /// A request is in flight.
    Running,
    /// The last request succeeded.
    Completed,
    /// The last request failed terminally.
    Failed,
    /// The last request was cancelled.
    Cancelled,
    /// The last request exhausted its deadline.
    TimedOut,
}

enum AttemptOutcome {
    Ran(MiddlewareResult),
    TimedOut,
    Cancelled,
}

/// The per-request orchestrator. See the module docs.
pub struct AgentExecutor {
    config: AgentConfig,
    exec_config: ExecutorConfig,
    llm: Option<Arc<dyn LLMClient>>,
    tools: Option<Arc<dyn ToolRegistry>>,
    bus: Option<Arc<EventBus>>,
    metrics: Option<MetricsCollector>,
    sessions: Option<Arc<SessionManager>>,
    memory: Option<Arc<dyn MemoryProvider>>,
    pipeline: Option<Arc<MiddlewarePipeline>>,
    state: RwLock<ExecutorState>,
}

impl std::fmt::Debug for AgentExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentExecutor")
            .field("config", &self.config)
            .field("exec_config", &self.exec_config)
            .finish()
    }
}

impl AgentExecutor {
    /// Create an executor for `config` with no collaborators attached.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            exec_config: ExecutorConfig::default(),
            llm: None,
            tools: None,
            bus: None,
            metrics: None,
            sessions: None,
            memory: None,
            pipeline: None,
            state: RwLock::new(ExecutorState::Idle),
        }
    }

    /// Attach the LLM client (builder pattern).
    pub fn with_llm_client(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Attach a tool registry the handler may route tool calls through
    /// (builder pattern).
    pub fn with_tool_registry(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Attach an event bus (builder pattern).
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Attach a metrics collector (builder pattern).
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attach a session manager (builder pattern).
    ///
    /// Also wires the default checkpoint-backed memory weave unless a
    /// memory provider was attached explicitly.
    pub fn with_session_manager(mut self, sessions: Arc<SessionManager>) -> Self {
        if self.memory.is_none() {
            self.memory = Some(Arc::new(CheckpointMemory::new(Arc::clone(&sessions))));
        }
        self.sessions = Some(sessions);
        self
    }

    /// Attach an explicit memory provider (builder pattern).
    pub fn with_memory(mut self, memory: Arc<dyn MemoryProvider>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach a middleware pipeline (builder pattern).
    pub fn with_pipeline(mut self, pipeline: Arc<MiddlewarePipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Override process-wide executor knobs (builder pattern).
    pub fn with_executor_config(mut self, exec_config: ExecutorConfig) -> Self {
        self.exec_config = exec_config;
        self
    }

    /// The agent configuration this executor runs.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Observable phase of the most recent request.
    pub fn state(&self) -> ExecutorState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: ExecutorState) {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = state;
    }

    // ── execute ──────────────────────────────────────────────────────────

    /// Run one request to completion.
    ///
    /// Never panics and never returns early without a fully formed
    /// [`AgentResult`]: failures come back as `success = false` with a
    /// taxonomy token in `metadata["error_type"]`.
    pub async fn execute(&self, ctx: AgentContext) -> AgentResult {
        let started = Instant::now();
        if let Err(err) = ctx.validate() {
            self.set_state(ExecutorState::Failed);
            return finalize(AgentResult::from_error(&err), started);
        }

        self.set_state(ExecutorState::Running);
        self.record(|m| m.inc_counter("agent_requests_total", &[("agent", &ctx.agent_id)]));
        let timer = self
            .metrics
            .as_ref()
            .map(|m| m.start_timer("agent_request_duration_seconds", &[("agent", &ctx.agent_id)]));
        self.publish(
            Event::new(EventType::AgentStarted, &ctx.agent_id)
                .with_user(&ctx.user_id)
                .with_session(&ctx.session_id)
                .with_trace(ctx.trace_id()),
        )
        .await;

        let mut ctx = ctx;
        self.weave_memory_in(&mut ctx).await;

        let timeout = self.request_timeout();
        let deadline = started + timeout;
        let handler = self.build_handler();
        let mut attempt: u32 = 0;

        let mut result = loop {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if remaining > Duration::ZERO => remaining,
                _ => break AgentResult::from_error(&RuntimeError::AgentTimeout(
                    timeout.as_millis() as u64,
                )),
            };

            // Each attempt gets its own child token so a deadline elapse can
            // cancel in-flight work without cancelling the request token.
            let attempt_cancel = ctx.cancel.child_token();
            let attempt_ctx = ctx.clone().with_cancellation(attempt_cancel.clone());
            let attempt_run = self.run_attempt(attempt_ctx, Arc::clone(&handler), attempt > 0);

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    attempt_cancel.cancel();
                    AttemptOutcome::Cancelled
                }
                ran = tokio::time::timeout(remaining, attempt_run) => match ran {
                    Ok(outcome) => AttemptOutcome::Ran(outcome),
                    Err(_) => {
                        attempt_cancel.cancel();
                        AttemptOutcome::TimedOut
                    }
                },
            };

            match outcome {
                AttemptOutcome::Cancelled => {
                    break AgentResult::from_error(&RuntimeError::Cancelled);
                }
                AttemptOutcome::TimedOut => {
                    break AgentResult::from_error(&RuntimeError::AgentTimeout(
                        timeout.as_millis() as u64,
                    ));
                }
                AttemptOutcome::Ran(outcome) => {
                    if outcome.success {
                        break outcome.result;
                    }
                    let retryable = outcome
                        .result
                        .error_type()
                        .map_or(false, RuntimeError::token_is_retryable);
                    if !retryable || attempt >= self.retry_attempts() {
                        break outcome.result;
                    }
                    attempt += 1;
                    self.record(|m| {
                        m.inc_counter("agent_retries_total", &[("agent", &ctx.agent_id)])
                    });
                    self.publish(
                        Event::new(EventType::RetryAttempted, &ctx.agent_id)
                            .with_user(&ctx.user_id)
                            .with_session(&ctx.session_id)
                            .with_metadata("attempt", Value::from(attempt))
                            .with_trace(ctx.trace_id()),
                    )
                    .await;

                    let delay = backoff_delay(
                        self.retry_base_delay(),
                        self.exec_config.retry_backoff_multiplier,
                        self.exec_config.retry_max_delay,
                        attempt,
                    );
                    let sleep = delay.min(deadline.saturating_duration_since(Instant::now()));
                    tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => {
                            break AgentResult::from_error(&RuntimeError::Cancelled);
                        }
                        _ = tokio::time::sleep(sleep) => {}
                    }
                }
            }
        };

        result = finalize(result, started);
        if let Some(timer) = timer {
            timer.stop();
        }

        if result.success {
            self.weave_memory_out(&ctx, &result).await;
        }
        let status = match result.error_type() {
            None => "ok",
            Some("CANCELLED") => "cancelled",
            Some("AGENT_TIMEOUT") => "timeout",
            Some(_) => "error",
        };
        self.record(|m| {
            m.inc_counter(
                "agent_requests_completed",
                &[("agent", &ctx.agent_id), ("status", status)],
            )
        });
        if result.success {
            self.set_state(ExecutorState::Completed);
            self.publish(
                Event::new(EventType::AgentCompleted, &ctx.agent_id)
                    .with_user(&ctx.user_id)
                    .with_session(&ctx.session_id)
                    .with_execution_time(result.execution_time_ms)
                    .with_metadata("tokens_used", Value::from(result.tokens_used))
                    .with_trace(ctx.trace_id()),
            )
            .await;
        } else {
            let token = result.error_type().unwrap_or("INTERNAL_ERROR").to_string();
            self.set_state(match token.as_str() {
                "CANCELLED" => ExecutorState::Cancelled,
                "AGENT_TIMEOUT" => ExecutorState::TimedOut,
                _ => ExecutorState::Failed,
            });
            self.publish(
                Event::new(EventType::ErrorOccurred, &ctx.agent_id)
                    .with_user(&ctx.user_id)
                    .with_session(&ctx.session_id)
                    .with_execution_time(result.execution_time_ms)
                    .with_error(token, result.error.clone())
                    .with_trace(ctx.trace_id()),
            )
            .await;
        }
        result
    }

    // ── execute_stream ───────────────────────────────────────────────────

    /// Run one request as a lazy, finite stream of output fragments.
    ///
    /// Not restartable. Dropping the stream — or cancelling the context
    /// token — propagates to the underlying LLM call. `AGENT_COMPLETED` is
    /// published after the last fragment; `ERROR_OCCURRED` replaces it on
    /// failure (including cancellation).
    pub fn execute_stream(&self, ctx: AgentContext) -> AgentStream {
        let llm = self.llm.clone();
        let bus = self.bus.clone();
        let metrics = self.metrics.clone();
        let params = self.sampling_params();
        let system_prompt = self.config.system_prompt.clone();

        Box::pin(stream! {
            let started = Instant::now();
            if let Err(err) = ctx.validate() {
                yield Err(err);
                return;
            }
            let llm = match llm {
                Some(llm) => llm,
                None => {
                    yield Err(RuntimeError::Config(
                        "no LLM client configured for streaming".into(),
                    ));
                    return;
                }
            };

            if let Some(metrics) = &metrics {
                metrics.inc_counter("agent_stream_requests_total", &[("agent", &ctx.agent_id)]);
            }
            if let Some(bus) = &bus {
                bus.publish(
                    Event::new(EventType::AgentStarted, &ctx.agent_id)
                        .with_user(&ctx.user_id)
                        .with_session(&ctx.session_id)
                        .with_trace(ctx.trace_id()),
                )
                .await;
            }

            let callback: Option<Arc<dyn LLMCallback>> = bus.clone().map(|bus| {
                Arc::new(CallbackHandler::for_context(&ctx).with_event_bus(bus))
                    as Arc<dyn LLMCallback>
            });
            let prompt = compose_prompt(&system_prompt, &ctx);

            let mut fragments = match llm
                .generate_stream(&prompt, &params, callback, &ctx.cancel)
                .await
            {
                Ok(fragments) => fragments,
                Err(err) => {
                    publish_stream_error(&bus, &ctx, &err, started).await;
                    yield Err(err);
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => Some(Err(RuntimeError::Cancelled)),
                    next = fragments.next() => next,
                };
                match next {
                    Some(Ok(fragment)) => yield Ok(fragment),
                    Some(Err(err)) => {
                        publish_stream_error(&bus, &ctx, &err, started).await;
                        yield Err(err);
                        return;
                    }
                    None => break,
                }
            }

            if let Some(bus) = &bus {
                bus.publish(
                    Event::new(EventType::AgentCompleted, &ctx.agent_id)
                        .with_user(&ctx.user_id)
                        .with_session(&ctx.session_id)
                        .with_execution_time(started.elapsed().as_millis() as u64)
                        .with_trace(ctx.trace_id()),
                )
                .await;
            }
        })
    }

    // ── execute_batch ────────────────────────────────────────────────────

    /// Run many requests with bounded concurrency, preserving input order
    /// in the returned vector. One request's failure never affects its
    /// siblings.
    pub async fn execute_batch(&self, ctxs: Vec<AgentContext>) -> Vec<AgentResult> {
        let limit = self.exec_config.batch_max_concurrency.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            (2 * cores).max(4)
        });
        self.run_batch(ctxs, limit, None).await
    }

    /// [`execute_batch`](AgentExecutor::execute_batch) with a caller-owned
    /// semaphore governing concurrency instead of the configured default.
    pub async fn execute_batch_with(
        &self,
        ctxs: Vec<AgentContext>,
        semaphore: Arc<Semaphore>,
    ) -> Vec<AgentResult> {
        let limit = ctxs.len().max(1);
        self.run_batch(ctxs, limit, Some(semaphore)).await
    }

    async fn run_batch(
        &self,
        ctxs: Vec<AgentContext>,
        limit: usize,
        semaphore: Option<Arc<Semaphore>>,
    ) -> Vec<AgentResult> {
        futures_util::stream::iter(ctxs.into_iter().map(|ctx| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = match &semaphore {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };
                self.execute(ctx).await
            }
        }))
        .buffered(limit.max(1))
        .collect()
        .await
    }

    // ── Attempt plumbing ─────────────────────────────────────────────────

    async fn run_attempt(
        &self,
        ctx: AgentContext,
        handler: Handler,
        retry_pass: bool,
    ) -> MiddlewareResult {
        match &self.pipeline {
            Some(pipeline) if retry_pass => pipeline.run_retry(ctx, handler).await,
            Some(pipeline) => pipeline.run(ctx, handler).await,
            None => match handler(ctx).await {
                Ok(result) => MiddlewareResult::from_result(result),
                Err(err) => MiddlewareResult::failure(&err),
            },
        }
    }

    /// The terminal step of the onion: LLM call plus a bounded tool loop,
    /// reported through the streaming callback sink.
    fn build_handler(&self) -> Handler {
        let llm = self.llm.clone();
        let tools = self.tools.clone();
        let bus = self.bus.clone();
        let params = self.sampling_params();
        let system_prompt = self.config.system_prompt.clone();

        Arc::new(move |ctx: AgentContext| {
            let llm = llm.clone();
            let tools = tools.clone();
            let bus = bus.clone();
            let params = params.clone();
            let system_prompt = system_prompt.clone();
            Box::pin(async move {
                let llm = llm.ok_or_else(|| {
                    RuntimeError::Config("no LLM client configured".into())
                })?;
                let callback = Arc::new({
                    let handler = CallbackHandler::for_context(&ctx);
                    match bus {
                        Some(bus) => handler.with_event_bus(bus),
                        None => handler,
                    }
                });
                let callback_dyn: Arc<dyn LLMCallback> = callback.clone();

                let mut transcript = compose_prompt(&system_prompt, &ctx);
                let mut tokens_used: u64 = 0;

                let mut response = llm
                    .generate(&transcript, &params, Some(callback_dyn.clone()), &ctx.cancel)
                    .await?;
                if let Some(usage) = &response.usage {
                    tokens_used += usage.total_tokens;
                }

                let mut iterations = 0;
                while let Some(call) = parse_tool_call(&response.content) {
                    let registry = match &tools {
                        Some(registry) => registry,
                        None => break,
                    };
                    if iterations >= MAX_TOOL_ITERATIONS {
                        warn!(
                            "agent {} hit the tool iteration cap ({})",
                            ctx.agent_id, MAX_TOOL_ITERATIONS
                        );
                        break;
                    }
                    iterations += 1;

                    callback.on_tool_call_start(&call.name).await;
                    let credentials = ctx.metadata.get("auth").and_then(|v| v.as_str());
                    let invocation = registry
                        .invoke(&call.name, call.arguments.clone(), credentials)
                        .await;
                    let feedback = match &invocation {
                        Ok(output) => {
                            callback.on_tool_call_end(&call.name, true, None).await;
                            format!(
                                "Tool '{}' returned: {}",
                                call.name,
                                serde_json::to_string(output)
                                    .unwrap_or_else(|_| "<unencodable>".into())
                            )
                        }
                        Err(err) => {
                            callback
                                .on_tool_call_end(&call.name, false, Some(&err.to_string()))
                                .await;
                            format!("Tool '{}' failed: {}", call.name, err)
                        }
                    };

                    transcript.push_str("\n\nAssistant: ");
                    transcript.push_str(&response.content);
                    transcript.push_str("\n\n");
                    transcript.push_str(&feedback);
                    transcript.push_str("\n\nContinue with the original task.");

                    response = llm
                        .generate(&transcript, &params, Some(callback_dyn.clone()), &ctx.cancel)
                        .await?;
                    if let Some(usage) = &response.usage {
                        tokens_used += usage.total_tokens;
                    }
                }

                if tokens_used == 0 {
                    if let Some(usage) = llm.last_usage().await {
                        tokens_used = usage.total_tokens;
                    }
                }
                Ok(AgentResult::ok(response.content).with_tokens_used(tokens_used))
            })
        })
    }

    // ── Memory weave ─────────────────────────────────────────────────────

    /// Load session memory into `ctx.metadata["memory"]` and refresh the
    /// session's activity clock. Best-effort on every edge.
    async fn weave_memory_in(&self, ctx: &mut AgentContext) {
        if let Some(sessions) = &self.sessions {
            if let Err(err) = sessions
                .update_session(&ctx.session_id, SessionPatch::default())
                .await
            {
                debug!("session activity refresh failed for {}: {}", ctx.session_id, err);
            }
        }
        if let Some(memory) = &self.memory {
            match memory.load(&ctx.session_id).await {
                Ok(Some(state)) => {
                    ctx.metadata.insert("memory".to_string(), state);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("memory load failed for {}: {}", ctx.session_id, err);
                }
            }
        }
    }

    /// Append this turn to the memory state and persist it. Best-effort.
    async fn weave_memory_out(&self, ctx: &AgentContext, result: &AgentResult) {
        let memory = match &self.memory {
            Some(memory) => memory,
            None => return,
        };
        let mut state = ctx
            .metadata
            .get("memory")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "turns": [] }));
        if !state.is_object() {
            state = serde_json::json!({ "turns": [] });
        }
        let turns = state
            .as_object_mut()
            .and_then(|o| {
                o.entry("turns".to_string())
                    .or_insert_with(|| Value::Array(Vec::new()))
                    .as_array_mut()
            });
        if let Some(turns) = turns {
            turns.push(serde_json::json!({
                "task": ctx.task,
                "output": result.output,
                "at": chrono::Utc::now(),
            }));
        }
        if let Err(err) = memory.save(&ctx.session_id, state).await {
            warn!("memory save failed for {}: {}", ctx.session_id, err);
        }
    }

    // ── Config accessors ─────────────────────────────────────────────────

    fn sampling_params(&self) -> SamplingParams {
        self.config.sampling()
    }

    fn request_timeout(&self) -> Duration {
        self.config
            .timeout
            .unwrap_or(self.exec_config.default_timeout)
    }

    fn retry_attempts(&self) -> u32 {
        self.config
            .retry_attempts
            .unwrap_or(self.exec_config.retry_attempts)
    }

    fn retry_base_delay(&self) -> Duration {
        self.config
            .retry_base_delay
            .unwrap_or(self.exec_config.retry_base_delay)
    }

    async fn publish(&self, event: Event) {
        if let Some(bus) = &self.bus {
            bus.publish(event).await;
        }
    }

    fn record(&self, f: impl FnOnce(&MetricsCollector)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}

/// Stamp the final wall-clock duration onto a result.
fn finalize(mut result: AgentResult, started: Instant) -> AgentResult {
    result.execution_time_ms = started.elapsed().as_millis() as u64;
    result
}

/// System prompt, prior-session memory, then the task.
fn compose_prompt(system_prompt: &str, ctx: &AgentContext) -> String {
    let mut prompt = String::new();
    if !system_prompt.is_empty() {
        prompt.push_str(system_prompt);
        prompt.push_str("\n\n");
    }
    if let Some(memory) = ctx.metadata.get("memory") {
        prompt.push_str("Context from earlier turns in this session:\n");
        prompt.push_str(&serde_json::to_string(memory).unwrap_or_default());
        prompt.push_str("\n\n");
    }
    prompt.push_str(&ctx.task);
    prompt
}

/// `base × factor^(attempt-1)`, capped at `max_delay`.
fn backoff_delay(base: Duration, factor: f64, max_delay: Duration, attempt: u32) -> Duration {
    let scaled = base.as_secs_f64() * factor.powi(attempt.saturating_sub(1) as i32);
    Duration::from_secs_f64(scaled.min(max_delay.as_secs_f64()).max(0.0))
}

async fn publish_stream_error(
    bus: &Option<Arc<EventBus>>,
    ctx: &AgentContext,
    err: &RuntimeError,
    started: Instant,
) {
    if let Some(bus) = bus {
        bus.publish(
            Event::new(EventType::ErrorOccurred, &ctx.agent_id)
                .with_user(&ctx.user_id)
                .with_session(&ctx.session_id)
                .with_execution_time(started.elapsed().as_millis() as u64)
                .with_error(err.error_type(), err.public_message())
                .with_trace(ctx.trace_id()),
        )
        .await;
    }
}
