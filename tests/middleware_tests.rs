use agentrt::context::{AgentContext, AgentResult};
use agentrt::error::RuntimeError;
use agentrt::event::{Event, EventBus, EventHandler, EventType};
use agentrt::middleware::{
    handler_fn, Handler, Middleware, MiddlewarePipeline, MiddlewareResult, Next,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

fn ctx() -> AgentContext {
    AgentContext::new("agent", "user", "sess", "task")
}

fn live_handler(log: Log) -> Handler {
    handler_fn(move |_ctx| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push("handler".into());
            Ok(AgentResult::ok("live"))
        }
    })
}

/// Pre-logs, delegates, post-logs. Optionally short-circuits instead.
struct Layer {
    name: String,
    priority: i32,
    log: Log,
    short_circuit: Option<MiddlewareResult>,
}

impl Layer {
    fn passthrough(name: &str, priority: i32, log: Log) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            priority,
            log,
            short_circuit: None,
        })
    }

    fn circuit(name: &str, priority: i32, log: Log, result: MiddlewareResult) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            priority,
            log,
            short_circuit: Some(result),
        })
    }
}

#[async_trait]
impl Middleware for Layer {
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
        self.log.lock().unwrap().push(format!("pre {}", self.name));
        if let Some(result) = &self.short_circuit {
            return Ok(result.clone());
        }
        let outcome = next.run(ctx).await;
        self.log.lock().unwrap().push(format!("post {}", self.name));
        Ok(outcome)
    }
}

#[tokio::test]
async fn test_skip_agent_in_outer_layer_short_circuits_inner_chain() {
    // Pipeline [A(priority=10, skip_agent, "cached"), B(priority=20)] with a
    // live handler: the cached result comes back, B's pre-processing never
    // ran, and A observed its own result on the way out.
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = MiddlewarePipeline::new();
    pipeline
        .add(Layer::circuit(
            "A",
            10,
            log.clone(),
            MiddlewareResult::skip_agent(AgentResult::ok("cached")),
        ))
        .unwrap();
    pipeline.add(Layer::passthrough("B", 20, log.clone())).unwrap();

    let outcome = pipeline.run(ctx(), live_handler(log.clone())).await;
    assert!(outcome.success);
    assert!(outcome.skip_agent);
    assert_eq!(outcome.result.output, "cached");
    assert_eq!(*log.lock().unwrap(), vec!["pre A"]);
}

#[tokio::test]
async fn test_skip_agent_in_innermost_layer_ran_all_pre_processing() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = MiddlewarePipeline::new();
    pipeline.add(Layer::passthrough("A", 10, log.clone())).unwrap();
    pipeline
        .add(Layer::circuit(
            "B",
            20,
            log.clone(),
            MiddlewareResult::skip_agent(AgentResult::ok("cached")),
        ))
        .unwrap();

    let outcome = pipeline.run(ctx(), live_handler(log.clone())).await;
    assert_eq!(outcome.result.output, "cached");
    // Every shallower middleware's pre-processing executed; the handler
    // never ran; A post-processed the cached result.
    assert_eq!(*log.lock().unwrap(), vec!["pre A", "pre B", "post A"]);
}

#[tokio::test]
async fn test_skip_rest_in_innermost_equals_returning_directly() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = MiddlewarePipeline::new();
    pipeline.add(Layer::passthrough("A", 10, log.clone())).unwrap();
    pipeline
        .add(Layer::circuit(
            "B",
            20,
            log.clone(),
            MiddlewareResult::skip_rest(AgentResult::ok("stopped")),
        ))
        .unwrap();

    let outcome = pipeline.run(ctx(), live_handler(log.clone())).await;
    assert!(outcome.skip_rest);
    assert_eq!(outcome.result.output, "stopped");
    assert_eq!(*log.lock().unwrap(), vec!["pre A", "pre B", "post A"]);
}

#[tokio::test]
async fn test_both_flags_return_immediately_and_unwind() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut combined = MiddlewareResult::skip_agent(AgentResult::ok("combined"));
    combined.skip_rest = true;

    let pipeline = MiddlewarePipeline::new();
    pipeline.add(Layer::passthrough("A", 10, log.clone())).unwrap();
    pipeline.add(Layer::circuit("B", 20, log.clone(), combined)).unwrap();
    pipeline.add(Layer::passthrough("C", 30, log.clone())).unwrap();

    let outcome = pipeline.run(ctx(), live_handler(log.clone())).await;
    assert!(outcome.skip_agent && outcome.skip_rest);
    assert_eq!(outcome.result.output, "combined");
    assert_eq!(*log.lock().unwrap(), vec!["pre A", "pre B", "post A"]);
}

/// Mutates the context inward and stamps the result outward.
struct Annotating;

#[async_trait]
impl Middleware for Annotating {
    fn name(&self) -> &str {
        "annotating"
    }

    fn priority(&self) -> i32 {
        5
    }

    async fn process(
        &self,
        mut ctx: AgentContext,
        next: Next,
    ) -> Result<MiddlewareResult, RuntimeError> {
        ctx.metadata
            .insert("annotated".into(), serde_json::json!(true));
        let mut outcome = next.run(ctx).await;
        outcome
            .result
            .metadata
            .insert("post_processed".into(), serde_json::json!(true));
        Ok(outcome)
    }
}

#[tokio::test]
async fn test_metadata_flows_inward_and_result_flows_outward() {
    let pipeline = MiddlewarePipeline::new();
    pipeline.add(Arc::new(Annotating)).unwrap();

    let handler = handler_fn(|ctx: AgentContext| async move {
        assert_eq!(ctx.metadata["annotated"], true);
        Ok(AgentResult::ok("done"))
    });
    let outcome = pipeline.run(ctx(), handler).await;
    assert!(outcome.success);
    assert_eq!(outcome.result.metadata["post_processed"], true);
}

#[tokio::test]
async fn test_handler_error_keeps_its_own_classification() {
    let pipeline = MiddlewarePipeline::new();
    pipeline
        .add(Layer::passthrough("A", 10, Arc::new(Mutex::new(Vec::new()))))
        .unwrap();

    let handler = handler_fn(|_ctx| async move {
        Err::<AgentResult, _>(RuntimeError::LlmRateLimited("429".into()))
    });
    let outcome = pipeline.run(ctx(), handler).await;
    assert!(!outcome.success);
    assert_eq!(outcome.result.error_type(), Some("LLM_RATE_LIMITED"));
}

struct EventRecorder {
    seen: Mutex<Vec<(EventType, String)>>,
}

#[async_trait]
impl EventHandler for EventRecorder {
    async fn handle_event(&self, event: &Event) -> Result<(), RuntimeError> {
        let name = event
            .metadata
            .get("middleware")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        self.seen.lock().unwrap().push((event.event_type, name));
        Ok(())
    }
}

struct Broken;

#[async_trait]
impl Middleware for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn process(
        &self,
        _ctx: AgentContext,
        _next: Next,
    ) -> Result<MiddlewareResult, RuntimeError> {
        Err(RuntimeError::Internal("boom".into()))
    }
}

#[tokio::test]
async fn test_middleware_events_name_each_layer() {
    let bus = Arc::new(EventBus::new());
    let recorder = Arc::new(EventRecorder {
        seen: Mutex::new(Vec::new()),
    });
    bus.subscribe(EventType::Any, recorder.clone()).await;

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = MiddlewarePipeline::new().with_event_bus(bus.clone());
    pipeline.add(Layer::passthrough("A", 10, log.clone())).unwrap();
    pipeline.add(Arc::new(Broken)).unwrap();

    let outcome = pipeline.run(ctx(), live_handler(log)).await;
    assert!(!outcome.success);

    let seen = recorder.seen.lock().unwrap();
    // Inner failure first (unwinding order), then the outer completion.
    assert_eq!(
        *seen,
        vec![
            (EventType::MiddlewareFailed, "broken".to_string()),
            (EventType::MiddlewareExecuted, "A".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_mutation_does_not_affect_in_flight_runs() {
    // A middleware that removes itself mid-run: the current traversal keeps
    // its snapshot, the next run sees the mutation.
    struct SelfRemoving {
        pipeline: Arc<MiddlewarePipeline>,
        log: Log,
    }

    #[async_trait]
    impl Middleware for SelfRemoving {
        fn name(&self) -> &str {
            "self-removing"
        }

        async fn process(
            &self,
            ctx: AgentContext,
            next: Next,
        ) -> Result<MiddlewareResult, RuntimeError> {
            self.log.lock().unwrap().push("ran".into());
            self.pipeline.remove("self-removing");
            Ok(next.run(ctx).await)
        }
    }

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Arc::new(MiddlewarePipeline::new());
    pipeline
        .add(Arc::new(SelfRemoving {
            pipeline: Arc::clone(&pipeline),
            log: log.clone(),
        }))
        .unwrap();

    let outcome = pipeline.run(ctx(), live_handler(log.clone())).await;
    assert!(outcome.success);
    assert_eq!(pipeline.count(), 0);

    pipeline.run(ctx(), live_handler(log.clone())).await;
    // Second run: only the handler.
    assert_eq!(
        *log.lock().unwrap(),
        vec!["ran", "handler", "handler"]
    );
}
