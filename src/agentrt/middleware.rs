//! Onion-model middleware pipeline.
//!
//! A [`Middleware`] wraps the executor's terminal LLM/tool step with pre-
//! and post-processing. The pipeline composes middlewares in ascending
//! priority order (stable insertion order for ties) as an onion: the
//! lowest-priority middleware is outermost, and the innermost
//! [`Next::run`] call invokes the handler.
//!
//! Inside [`process`](Middleware::process) a middleware may:
//!
//! - inspect and extend `ctx.metadata` before delegating (identity fields
//!   are read-only by convention);
//! - call `next.run(ctx)` **at most once** (the continuation is consumed)
//!   and post-process the returned result;
//! - return a result *without* delegating — with
//!   [`skip_agent`](MiddlewareResult::skip_agent) to bypass the inner
//!   chain and the handler, or [`skip_rest`](MiddlewareResult::skip_rest)
//!   to stop descending. Either way, every *outer* middleware still
//!   observes the result on the way out. Setting both flags means: return
//!   immediately, begin the outer unwind.
//!
//! A middleware `Err` is converted at its invocation site into a failed
//! result carrying `MIDDLEWARE_ERROR`, so outer post-processing (logging,
//! metrics) still runs. Disabled middlewares are skipped silently, as are
//! non-idempotent ones during a retry pass (see
//! [`MiddlewarePipeline::run_retry`]).
//!
//! # Example
//!
//! ```rust
//! use agentrt::context::{AgentContext, AgentResult};
//! use agentrt::error::RuntimeError;
//! use agentrt::middleware::{
//!     Middleware, MiddlewarePipeline, MiddlewareResult, Next,
//! };
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Tagging;
//!
//! #[async_trait]
//! impl Middleware for Tagging {
//!     fn name(&self) -> &str {
//!         "tagging"
//!     }
//!
//!     async fn process(
//!         &self,
//!         mut ctx: AgentContext,
//!         next: Next,
//!     ) -> Result<MiddlewareResult, RuntimeError> {
//!         ctx.metadata.insert("tagged".into(), serde_json::json!(true));
//!         let mut outcome = next.run(ctx).await;
//!         outcome.result.metadata.insert("seen".into(), serde_json::json!("tagging"));
//!         Ok(outcome)
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pipeline = MiddlewarePipeline::new();
//! pipeline.add(Arc::new(Tagging)).unwrap();
//!
//! let handler = agentrt::middleware::handler_fn(|ctx: AgentContext| async move {
//!     assert_eq!(ctx.metadata["tagged"], true);
//!     Ok(AgentResult::ok("done"))
//! });
//! let outcome = pipeline
//!     .run(AgentContext::new("a", "u", "s", "task"), handler)
//!     .await;
//! assert!(outcome.success);
//! assert_eq!(outcome.result.metadata["seen"], "tagging");
//! # }
//! ```

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, RwLock};

use crate::agentrt::context::{AgentContext, AgentResult};
use crate::agentrt::error::RuntimeError;
use crate::agentrt::event::{Event, EventBus, EventType};

/// The terminal step of the onion: the executor's LLM/tool closure.
pub type Handler =
    Arc<dyn Fn(AgentContext) -> BoxFuture<'static, Result<AgentResult, RuntimeError>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(AgentContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AgentResult, RuntimeError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Outcome of one pipeline traversal (or one middleware's early return).
#[derive(Debug, Clone)]
pub struct MiddlewareResult {
    /// Mirror of `result.success`, kept for cheap branching.
    pub success: bool,
    /// The wrapped request result.
    pub result: AgentResult,
    /// The inner chain (including the handler) was deliberately bypassed;
    /// outer middlewares still post-process this result.
    pub skip_agent: bool,
    /// Descent stopped here; unwinding began immediately. Combined with
    /// `skip_agent` this still means exactly one thing: nothing inner ran.
    pub skip_rest: bool,
}

impl MiddlewareResult {
    /// Wrap a handler or post-processed result.
    pub fn from_result(result: AgentResult) -> Self {
        Self {
            success: result.success,
            result,
            skip_agent: false,
            skip_rest: false,
        }
    }

    /// Short-circuit: bypass the inner chain and the handler.
    pub fn skip_agent(result: AgentResult) -> Self {
        Self {
            success: result.success,
            result,
            skip_agent: true,
            skip_rest: false,
        }
    }

    /// Short-circuit: stop descending, begin unwinding.
    pub fn skip_rest(result: AgentResult) -> Self {
        Self {
            success: result.success,
            result,
            skip_agent: false,
            skip_rest: true,
        }
    }

    /// A failed traversal derived from an error.
    pub fn failure(err: &RuntimeError) -> Self {
        Self {
            success: false,
            result: AgentResult::from_error(err),
            skip_agent: false,
            skip_rest: false,
        }
    }
}

/// A named, ordered processing unit in the pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Unique name within a pipeline.
    fn name(&self) -> &str;

    /// Execution order: lower runs first (outermost). Equal priorities keep
    /// insertion order.
    fn priority(&self) -> i32 {
        0
    }

    /// Disabled middlewares are skipped silently.
    fn enabled(&self) -> bool {
        true
    }

    /// Whether this middleware is safe to re-run on a retry attempt.
    /// Middlewares with side effects (audit writes, quota deduction) should
    /// return `false`; the retry pass skips them.
    fn idempotent(&self) -> bool {
        true
    }

    /// Process the request. See the module docs for the contract.
    async fn process(
        &self,
        ctx: AgentContext,
        next: Next,
    ) -> Result<MiddlewareResult, RuntimeError>;
}

/// Continuation handed to [`Middleware::process`].
///
/// Consuming `self`, [`run`](Next::run) invokes the remainder of the chain
/// (ending in the handler) and returns the inner result for
/// post-processing. Not calling it is the short-circuit.
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    handler: Handler,
    skip_non_idempotent: bool,
    bus: Option<Arc<EventBus>>,
}

impl Next {
    /// Invoke the rest of the onion with `ctx`.
    pub fn run(mut self, ctx: AgentContext) -> BoxFuture<'static, MiddlewareResult> {
        Box::pin(async move {
            // Every descent step is a cancellation checkpoint.
            if ctx.cancel.is_cancelled() {
                return MiddlewareResult::failure(&RuntimeError::Cancelled);
            }

            while self.index < self.chain.len() {
                let middleware = Arc::clone(&self.chain[self.index]);
                self.index += 1;
                if !middleware.enabled() {
                    continue;
                }
                if self.skip_non_idempotent && !middleware.idempotent() {
                    continue;
                }

                let bus = self.bus.clone();
                let name = middleware.name().to_string();
                let agent_id = ctx.agent_id.clone();
                let session_id = ctx.session_id.clone();
                let trace_id = ctx.trace_id();

                return match middleware.process(ctx, self).await {
                    Ok(outcome) => {
                        if let Some(bus) = &bus {
                            bus.publish(
                                Event::new(EventType::MiddlewareExecuted, agent_id)
                                    .with_session(session_id)
                                    .with_metadata("middleware", Value::String(name))
                                    .with_trace(trace_id),
                            )
                            .await;
                        }
                        outcome
                    }
                    Err(err) => {
                        let converted = RuntimeError::Middleware {
                            name: name.clone(),
                            message: err.to_string(),
                        };
                        if let Some(bus) = &bus {
                            bus.publish(
                                Event::new(EventType::MiddlewareFailed, agent_id)
                                    .with_session(session_id)
                                    .with_metadata("middleware", Value::String(name))
                                    .with_error(converted.error_type(), converted.to_string())
                                    .with_trace(trace_id),
                            )
                            .await;
                        }
                        MiddlewareResult::failure(&converted)
                    }
                };
            }

            // Terminal step: the handler. Its errors classify by their own
            // token rather than MIDDLEWARE_ERROR.
            match (self.handler)(ctx).await {
                Ok(result) => MiddlewareResult::from_result(result),
                Err(err) => MiddlewareResult::failure(&err),
            }
        })
    }
}

struct ChainEntry {
    priority: i32,
    seq: u64,
    middleware: Arc<dyn Middleware>,
}

/// Ordered, priority-sorted middleware chain.
///
/// The chain snapshot handed to each [`run`](MiddlewarePipeline::run) is
/// copy-on-write: mutations build a new snapshot and never affect in-flight
/// traversals.
pub struct MiddlewarePipeline {
    entries: RwLock<(Vec<ChainEntry>, u64)>,
    bus: Option<Arc<EventBus>>,
}

impl MiddlewarePipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new((Vec::new(), 0)),
            bus: None,
        }
    }

    /// Attach an event bus; each middleware completion then publishes
    /// `MIDDLEWARE_EXECUTED` (or `MIDDLEWARE_FAILED`) with the middleware
    /// name in event metadata (builder pattern).
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register a middleware. Fails with `CONFIG_ERROR` on a duplicate name.
    pub fn add(&self, middleware: Arc<dyn Middleware>) -> Result<(), RuntimeError> {
        let mut guard = self.write();
        let (entries, seq) = &mut *guard;
        if entries.iter().any(|e| e.middleware.name() == middleware.name()) {
            return Err(RuntimeError::Config(format!(
                "middleware '{}' is already registered",
                middleware.name()
            )));
        }
        *seq += 1;
        entries.push(ChainEntry {
            priority: middleware.priority(),
            seq: *seq,
            middleware,
        });
        entries.sort_by_key(|e| (e.priority, e.seq));
        Ok(())
    }

    /// Remove a middleware by name. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        let mut guard = self.write();
        let before = guard.0.len();
        guard.0.retain(|e| e.middleware.name() != name);
        guard.0.len() != before
    }

    /// Fetch a registered middleware by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Middleware>> {
        self.read()
            .0
            .iter()
            .find(|e| e.middleware.name() == name)
            .map(|e| Arc::clone(&e.middleware))
    }

    /// Registered middleware names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.read()
            .0
            .iter()
            .map(|e| e.middleware.name().to_string())
            .collect()
    }

    /// Remove every middleware.
    pub fn clear(&self) {
        self.write().0.clear();
    }

    /// Number of registered middlewares (enabled or not).
    pub fn count(&self) -> usize {
        self.read().0.len()
    }

    /// Run `ctx` through the onion, ending in `handler`.
    pub async fn run(&self, ctx: AgentContext, handler: Handler) -> MiddlewareResult {
        self.traverse(ctx, handler, false).await
    }

    /// Retry pass: identical to [`run`](MiddlewarePipeline::run), except
    /// middlewares that declared themselves non-idempotent are skipped
    /// silently.
    pub async fn run_retry(&self, ctx: AgentContext, handler: Handler) -> MiddlewareResult {
        self.traverse(ctx, handler, true).await
    }

    async fn traverse(
        &self,
        ctx: AgentContext,
        handler: Handler,
        skip_non_idempotent: bool,
    ) -> MiddlewareResult {
        let chain: Arc<[Arc<dyn Middleware>]> = {
            let guard = self.read();
            guard
                .0
                .iter()
                .map(|e| Arc::clone(&e.middleware))
                .collect::<Vec<_>>()
                .into()
        };
        let next = Next {
            chain,
            index: 0,
            handler,
            skip_non_idempotent,
            bus: self.bus.clone(),
        };
        next.run(ctx).await
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, (Vec<ChainEntry>, u64)> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, (Vec<ChainEntry>, u64)> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MiddlewarePipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records enter/exit order to make onion traversal observable.
    struct Tracing {
        name: String,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Tracing {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn process(
            &self,
            ctx: AgentContext,
            next: Next,
        ) -> Result<MiddlewareResult, RuntimeError> {
            self.log.lock().unwrap().push(format!("enter {}", self.name));
            let outcome = next.run(ctx).await;
            self.log.lock().unwrap().push(format!("exit {}", self.name));
            Ok(outcome)
        }
    }

    fn ok_handler(output: &'static str) -> Handler {
        handler_fn(move |_ctx| async move { Ok(AgentResult::ok(output)) })
    }

    #[tokio::test]
    async fn test_onion_order_is_priority_then_insertion() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        pipeline
            .add(Arc::new(Tracing {
                name: "inner".into(),
                priority: 20,
                log: log.clone(),
            }))
            .unwrap();
        pipeline
            .add(Arc::new(Tracing {
                name: "outer".into(),
                priority: 10,
                log: log.clone(),
            }))
            .unwrap();
        pipeline
            .add(Arc::new(Tracing {
                name: "inner2".into(),
                priority: 20,
                log: log.clone(),
            }))
            .unwrap();

        let outcome = pipeline
            .run(AgentContext::new("a", "u", "s", "t"), ok_handler("live"))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.result.output, "live");
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "enter outer",
                "enter inner",
                "enter inner2",
                "exit inner2",
                "exit inner",
                "exit outer"
            ]
        );
    }

    struct Erroring;

    #[async_trait]
    impl Middleware for Erroring {
        fn name(&self) -> &str {
            "erroring"
        }

        fn priority(&self) -> i32 {
            20
        }

        async fn process(
            &self,
            _ctx: AgentContext,
            _next: Next,
        ) -> Result<MiddlewareResult, RuntimeError> {
            Err(RuntimeError::Internal("middleware blew up".into()))
        }
    }

    #[tokio::test]
    async fn test_error_converts_and_outer_post_processing_runs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        pipeline
            .add(Arc::new(Tracing {
                name: "outer".into(),
                priority: 10,
                log: log.clone(),
            }))
            .unwrap();
        pipeline.add(Arc::new(Erroring)).unwrap();

        let outcome = pipeline
            .run(AgentContext::new("a", "u", "s", "t"), ok_handler("live"))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.result.error_type(), Some("MIDDLEWARE_ERROR"));
        // Outer middleware observed the failure on the way out.
        assert_eq!(*log.lock().unwrap(), vec!["enter outer", "exit outer"]);
    }

    struct Disabled;

    #[async_trait]
    impl Middleware for Disabled {
        fn name(&self) -> &str {
            "disabled"
        }

        fn enabled(&self) -> bool {
            false
        }

        async fn process(
            &self,
            _ctx: AgentContext,
            _next: Next,
        ) -> Result<MiddlewareResult, RuntimeError> {
            Err(RuntimeError::Internal("must never run".into()))
        }
    }

    #[tokio::test]
    async fn test_disabled_middleware_is_skipped_silently() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(Arc::new(Disabled)).unwrap();
        let outcome = pipeline
            .run(AgentContext::new("a", "u", "s", "t"), ok_handler("live"))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.result.output, "live");
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(Arc::new(Disabled)).unwrap();
        let err = pipeline.add(Arc::new(Disabled)).unwrap_err();
        assert_eq!(err.error_type(), "CONFIG_ERROR");
        assert_eq!(pipeline.count(), 1);
        assert!(pipeline.remove("disabled"));
        assert!(!pipeline.remove("disabled"));
    }

    struct SideEffect {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for SideEffect {
        fn name(&self) -> &str {
            "side-effect"
        }

        fn idempotent(&self) -> bool {
            false
        }

        async fn process(
            &self,
            ctx: AgentContext,
            next: Next,
        ) -> Result<MiddlewareResult, RuntimeError> {
            self.log.lock().unwrap().push("side-effect ran".into());
            Ok(next.run(ctx).await)
        }
    }

    #[tokio::test]
    async fn test_retry_pass_skips_non_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new();
        pipeline.add(Arc::new(SideEffect { log: log.clone() })).unwrap();

        pipeline
            .run(AgentContext::new("a", "u", "s", "t"), ok_handler("x"))
            .await;
        pipeline
            .run_retry(AgentContext::new("a", "u", "s", "t"), ok_handler("x"))
            .await;
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let pipeline = MiddlewarePipeline::new();
        let ctx = AgentContext::new("a", "u", "s", "t");
        ctx.cancel.cancel();
        let outcome = pipeline.run(ctx, ok_handler("x")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.result.error_type(), Some("CANCELLED"));
    }
}
