//! Runtime configuration.
//!
//! Plain structs with hand-rolled `Default` impls — users construct these
//! however they want (builders, literals, their own file parsing). No TOML,
//! YAML, or other config-file dependencies are introduced by this crate.
//!
//! # Example
//!
//! ```rust
//! use agentrt::config::{RuntimeConfig, SessionConfig};
//!
//! // All defaults
//! let config = RuntimeConfig::default();
//! assert_eq!(config.session.ttl_seconds, 3600);
//!
//! // Override one section
//! let config = RuntimeConfig {
//!     session: SessionConfig {
//!         ttl_seconds: 120,
//!         ..SessionConfig::default()
//!     },
//!     ..RuntimeConfig::default()
//! };
//! assert_eq!(config.session.ttl_seconds, 120);
//! ```

use std::time::Duration;

/// Top-level configuration for the runtime core, grouped by subsystem.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Session manager settings.
    pub session: SessionConfig,
    /// Event bus settings.
    pub event_bus: EventBusConfig,
    /// Middleware pipeline settings.
    pub middleware: MiddlewareConfig,
    /// Executor settings.
    pub executor: ExecutorConfig,
    /// Metrics collector settings.
    pub metrics: MetricsConfig,
}

/// Settings for [`SessionManager`](crate::session_manager::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of a session from creation (or refresh) to expiry.
    pub ttl_seconds: u64,
    /// Global ceiling on live sessions; `create_session` fails with
    /// `QUOTA_EXCEEDED` beyond it.
    pub max_count: usize,
    /// Interval between background expiry sweeps.
    pub cleanup_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            max_count: 10_000,
            cleanup_interval_seconds: 300,
        }
    }
}

/// Settings for [`EventBus`](crate::event::EventBus).
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Ring-buffer capacity of the event history; oldest entries drop first.
    pub max_history: usize,
    /// Cap on in-flight handler invocations per publish.
    pub max_concurrent_handlers: usize,
    /// Budget per handler invocation; slower handlers are abandoned (their
    /// work keeps running, the result is ignored).
    pub handler_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_history: 1000,
            max_concurrent_handlers: 16,
            handler_timeout: Duration::from_secs(5),
        }
    }
}

/// Settings for [`MiddlewarePipeline`](crate::middleware::MiddlewarePipeline).
#[derive(Debug, Clone)]
pub struct MiddlewareConfig {
    /// Fallback budget for a pipeline run when the caller supplies none.
    /// The executor normally passes its remaining request budget instead.
    pub default_timeout: Duration,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for [`AgentExecutor`](crate::executor::AgentExecutor) defaults.
///
/// Per-agent values (`timeout`, `retry_attempts`, `retry_base_delay`) live on
/// [`AgentConfig`](crate::factory::AgentConfig); this struct carries the
/// process-wide knobs the executor applies on top of them.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Request timeout applied when an agent config does not set one.
    pub default_timeout: Duration,
    /// Retry attempts applied when an agent config does not set them.
    pub retry_attempts: u32,
    /// First backoff delay applied when an agent config does not set one.
    pub retry_base_delay: Duration,
    /// Multiplier applied to the backoff delay after each failed attempt.
    pub retry_backoff_multiplier: f64,
    /// Ceiling on any single backoff delay.
    pub retry_max_delay: Duration,
    /// Concurrency cap for `execute_batch`. `None` selects
    /// `max(4, 2 × available cores)` at call time.
    pub batch_max_concurrency: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_backoff_multiplier: 2.0,
            retry_max_delay: Duration::from_secs(60),
            batch_max_concurrency: None,
        }
    }
}

/// Settings for [`MetricsCollector`](crate::metrics::MetricsCollector).
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Upper bucket boundaries (in seconds) used by histograms that were not
    /// declared with explicit buckets before their first observation.
    pub default_histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            default_histogram_buckets: vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}
