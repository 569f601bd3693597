//! Agent configuration and the executor factory.
//!
//! [`AgentConfig`] is the immutable descriptor of one agent: identity,
//! model, sampling parameters, and per-request timeout/retry settings.
//! [`AgentFactory`] holds a registry of named [`AgentTemplate`]s and stamps
//! out configured [`AgentExecutor`]s from them, wiring in the
//! collaborators (LLM client, bus, metrics, session manager, pipeline) the
//! factory itself was built with.
//!
//! The factory validates configurations twice — at registration and again
//! at creation after overrides are applied — and is stateless beyond the
//! template registry.
//!
//! # Example
//!
//! ```rust
//! use agentrt::factory::{AgentConfig, AgentFactory, AgentOverrides, AgentTemplate};
//!
//! let factory = AgentFactory::new();
//! factory
//!     .register_template(AgentTemplate::new(
//!         "summarizer",
//!         "Summarizes documents",
//!         AgentConfig::new("summarizer", "gpt-4o").with_temperature(0.2),
//!     ))
//!     .unwrap();
//!
//! let config = factory
//!     .create_from_template(
//!         "summarizer",
//!         Some(&AgentOverrides {
//!             max_tokens: Some(2048),
//!             ..AgentOverrides::default()
//!         }),
//!     )
//!     .unwrap();
//! assert_eq!(config.max_tokens, 2048);
//! assert_eq!(config.temperature, 0.2);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::agentrt::config::ExecutorConfig;
use crate::agentrt::error::RuntimeError;
use crate::agentrt::event::EventBus;
use crate::agentrt::executor::AgentExecutor;
use crate::agentrt::llm_client::{LLMClient, SamplingParams};
use crate::agentrt::metrics::MetricsCollector;
use crate::agentrt::middleware::MiddlewarePipeline;
use crate::agentrt::session_manager::SessionManager;
use crate::agentrt::tool::ToolRegistry;

/// Immutable descriptor of one agent.
///
/// `timeout`, `retry_attempts`, and `retry_base_delay` are optional; when
/// unset, the executor falls back to its process-wide
/// [`ExecutorConfig`] defaults.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Unique name within a factory.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Provider model identifier.
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
    /// System prompt prepended to every request.
    pub system_prompt: String,
    /// Per-request deadline.
    pub timeout: Option<Duration>,
    /// Retry attempts on retryable failures.
    pub retry_attempts: Option<u32>,
    /// First backoff delay.
    pub retry_base_delay: Option<Duration>,
}

impl AgentConfig {
    /// Create a config with conservative sampling defaults.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            model: model.into(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: 1024,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop_sequences: Vec::new(),
            system_prompt: String::new(),
            timeout: None,
            retry_attempts: None,
            retry_base_delay: None,
        }
    }

    /// Attach a description (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the system prompt (builder pattern).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the sampling temperature (builder pattern).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the generation cap (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the per-request deadline (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry policy (builder pattern).
    pub fn with_retries(mut self, attempts: u32, base_delay: Duration) -> Self {
        self.retry_attempts = Some(attempts);
        self.retry_base_delay = Some(base_delay);
        self
    }

    /// Check every documented range. Fails with `CONFIG_ERROR`.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.name.trim().is_empty() {
            return Err(RuntimeError::Config("agent name must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(RuntimeError::Config(format!(
                "agent '{}' has no model id",
                self.name
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RuntimeError::Config(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(RuntimeError::Config(format!(
                "top_p {} outside [0, 1]",
                self.top_p
            )));
        }
        if self.max_tokens < 1 {
            return Err(RuntimeError::Config("max_tokens must be at least 1".into()));
        }
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(RuntimeError::Config(format!(
                "frequency_penalty {} outside [-2, 2]",
                self.frequency_penalty
            )));
        }
        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(RuntimeError::Config(format!(
                "presence_penalty {} outside [-2, 2]",
                self.presence_penalty
            )));
        }
        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(RuntimeError::Config("timeout must be positive".into()));
            }
        }
        Ok(())
    }

    /// The sampling parameters forwarded to the LLM client.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            stop_sequences: self.stop_sequences.clone(),
        }
    }
}

/// Per-creation adjustments layered over a template's config.
#[derive(Debug, Clone, Default)]
pub struct AgentOverrides {
    /// Replace the description.
    pub description: Option<String>,
    /// Replace the model id.
    pub model: Option<String>,
    /// Replace the temperature.
    pub temperature: Option<f32>,
    /// Replace the nucleus cutoff.
    pub top_p: Option<f32>,
    /// Replace the generation cap.
    pub max_tokens: Option<u32>,
    /// Replace the frequency penalty.
    pub frequency_penalty: Option<f32>,
    /// Replace the presence penalty.
    pub presence_penalty: Option<f32>,
    /// Replace the stop sequences.
    pub stop_sequences: Option<Vec<String>>,
    /// Replace the system prompt.
    pub system_prompt: Option<String>,
    /// Replace the per-request deadline.
    pub timeout: Option<Duration>,
    /// Replace the retry attempt count.
    pub retry_attempts: Option<u32>,
    /// Replace the first backoff delay.
    pub retry_base_delay: Option<Duration>,
}

impl AgentOverrides {
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(description) = &self.description {
            config.description = description.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(top_p) = self.top_p {
            config.top_p = top_p;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(frequency_penalty) = self.frequency_penalty {
            config.frequency_penalty = frequency_penalty;
        }
        if let Some(presence_penalty) = self.presence_penalty {
            config.presence_penalty = presence_penalty;
        }
        if let Some(stop_sequences) = &self.stop_sequences {
            config.stop_sequences = stop_sequences.clone();
        }
        if let Some(system_prompt) = &self.system_prompt {
            config.system_prompt = system_prompt.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if let Some(retry_attempts) = self.retry_attempts {
            config.retry_attempts = Some(retry_attempts);
        }
        if let Some(retry_base_delay) = self.retry_base_delay {
            config.retry_base_delay = Some(retry_base_delay);
        }
    }
}

/// A named default configuration agents are created from.
#[derive(Debug, Clone)]
pub struct AgentTemplate {
    /// Registry key.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// The default configuration.
    pub config: AgentConfig,
}

impl AgentTemplate {
    /// Create a template. The config's name is forced to the template name
    /// so creations are always identifiable.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        mut config: AgentConfig,
    ) -> Self {
        let name = name.into();
        config.name = name.clone();
        Self {
            name,
            description: description.into(),
            config,
        }
    }
}

/// One entry of a [`AgentFactory::create_batch`] request.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Template to create from.
    pub template: String,
    /// Optional per-creation adjustments.
    pub overrides: Option<AgentOverrides>,
}

/// Produces configured executors from registered templates.
pub struct AgentFactory {
    templates: RwLock<HashMap<String, AgentTemplate>>,
    exec_config: ExecutorConfig,
    llm: Option<Arc<dyn LLMClient>>,
    tools: Option<Arc<dyn ToolRegistry>>,
    bus: Option<Arc<EventBus>>,
    metrics: Option<MetricsCollector>,
    sessions: Option<Arc<SessionManager>>,
    pipeline: Option<Arc<MiddlewarePipeline>>,
}

impl AgentFactory {
    /// Create an empty factory with no collaborators.
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
            exec_config: ExecutorConfig::default(),
            llm: None,
            tools: None,
            bus: None,
            metrics: None,
            sessions: None,
            pipeline: None,
        }
    }

    /// Attach the LLM client handed to created executors (builder pattern).
    pub fn with_llm_client(mut self, llm: Arc<dyn LLMClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Attach the tool registry handed to created executors (builder pattern).
    pub fn with_tool_registry(mut self, tools: Arc<dyn ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Attach the event bus handed to created executors (builder pattern).
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Attach the metrics collector handed to created executors (builder pattern).
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attach the session manager handed to created executors (builder pattern).
    pub fn with_session_manager(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Attach the middleware pipeline handed to created executors (builder pattern).
    pub fn with_pipeline(mut self, pipeline: Arc<MiddlewarePipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Override the process-wide executor knobs (builder pattern).
    pub fn with_executor_config(mut self, exec_config: ExecutorConfig) -> Self {
        self.exec_config = exec_config;
        self
    }

    /// Register a template. Fails with `CONFIG_ERROR` on an invalid config
    /// or a duplicate name.
    pub fn register_template(&self, template: AgentTemplate) -> Result<(), RuntimeError> {
        template.config.validate()?;
        let mut templates = self.write();
        if templates.contains_key(&template.name) {
            return Err(RuntimeError::Config(format!(
                "template '{}' is already registered",
                template.name
            )));
        }
        templates.insert(template.name.clone(), template);
        Ok(())
    }

    /// Remove a template. Returns whether it existed.
    pub fn unregister_template(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    /// Registered template names, sorted.
    pub fn list_templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Fetch a template by name.
    pub fn get_template(&self, name: &str) -> Option<AgentTemplate> {
        self.read().get(name).cloned()
    }

    /// Resolve a template plus overrides into a validated config.
    pub fn create_from_template(
        &self,
        name: &str,
        overrides: Option<&AgentOverrides>,
    ) -> Result<AgentConfig, RuntimeError> {
        let template = self
            .get_template(name)
            .ok_or_else(|| RuntimeError::Config(format!("unknown template '{}'", name)))?;
        let mut config = template.config;
        if let Some(overrides) = overrides {
            overrides.apply(&mut config);
        }
        config.validate()?;
        Ok(config)
    }

    /// Create a fully wired executor from a template.
    pub fn create_agent(
        &self,
        name: &str,
        overrides: Option<&AgentOverrides>,
    ) -> Result<AgentExecutor, RuntimeError> {
        let config = self.create_from_template(name, overrides)?;
        let mut executor =
            AgentExecutor::new(config).with_executor_config(self.exec_config.clone());
        if let Some(llm) = &self.llm {
            executor = executor.with_llm_client(Arc::clone(llm));
        }
        if let Some(tools) = &self.tools {
            executor = executor.with_tool_registry(Arc::clone(tools));
        }
        if let Some(bus) = &self.bus {
            executor = executor.with_event_bus(Arc::clone(bus));
        }
        if let Some(metrics) = &self.metrics {
            executor = executor.with_metrics(metrics.clone());
        }
        if let Some(sessions) = &self.sessions {
            executor = executor.with_session_manager(Arc::clone(sessions));
        }
        if let Some(pipeline) = &self.pipeline {
            executor = executor.with_pipeline(Arc::clone(pipeline));
        }
        Ok(executor)
    }

    /// Create one executor per spec, failing the whole batch on the first
    /// invalid entry.
    pub fn create_batch(&self, specs: &[AgentSpec]) -> Result<Vec<AgentExecutor>, RuntimeError> {
        specs
            .iter()
            .map(|spec| self.create_agent(&spec.template, spec.overrides.as_ref()))
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, AgentTemplate>> {
        match self.templates.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, AgentTemplate>> {
        match self.templates.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for AgentFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation_ranges() {
        assert!(AgentConfig::new("a", "m").validate().is_ok());
        assert!(AgentConfig::new("", "m").validate().is_err());
        assert!(AgentConfig::new("a", "").validate().is_err());

        let mut config = AgentConfig::new("a", "m");
        config.temperature = 2.1;
        assert_eq!(config.validate().unwrap_err().error_type(), "CONFIG_ERROR");

        let mut config = AgentConfig::new("a", "m");
        config.top_p = -0.1;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::new("a", "m");
        config.max_tokens = 0;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::new("a", "m");
        config.presence_penalty = -2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_template_name_wins_over_config_name() {
        let template = AgentTemplate::new("canonical", "", AgentConfig::new("other", "m"));
        assert_eq!(template.config.name, "canonical");
    }

    #[test]
    fn test_duplicate_template_rejected() {
        let factory = AgentFactory::new();
        factory
            .register_template(AgentTemplate::new("t", "", AgentConfig::new("t", "m")))
            .unwrap();
        let err = factory
            .register_template(AgentTemplate::new("t", "", AgentConfig::new("t", "m")))
            .unwrap_err();
        assert_eq!(err.error_type(), "CONFIG_ERROR");
        assert!(factory.unregister_template("t"));
        assert!(!factory.unregister_template("t"));
    }

    #[test]
    fn test_invalid_override_fails_at_creation() {
        let factory = AgentFactory::new();
        factory
            .register_template(AgentTemplate::new("t", "", AgentConfig::new("t", "m")))
            .unwrap();
        let err = factory
            .create_from_template(
                "t",
                Some(&AgentOverrides {
                    temperature: Some(5.0),
                    ..AgentOverrides::default()
                }),
            )
            .unwrap_err();
        assert_eq!(err.error_type(), "CONFIG_ERROR");
    }

    #[test]
    fn test_unknown_template_is_config_error() {
        let factory = AgentFactory::new();
        let err = factory.create_agent("missing", None).unwrap_err();
        assert_eq!(err.error_type(), "CONFIG_ERROR");
    }
}
