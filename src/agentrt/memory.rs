//! Agent memory weaving.
//!
//! The executor treats memory as an opaque JSON state keyed by session id:
//! loaded best-effort before the middleware chain runs, saved best-effort
//! after a successful run. Real memory systems (vector stores, summarizers)
//! live outside this crate behind [`MemoryProvider`]; the two implementations
//! here cover the runtime's own needs:
//!
//! - [`CheckpointMemory`] — the default when an executor has a session
//!   manager: state round-trips through session checkpoints, so a resumed
//!   session picks up exactly where the last checkpoint left it.
//! - [`EphemeralMemory`] — a process-local map for tests and for embedders
//!   that want memory without durability.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::agentrt::error::RuntimeError;
use crate::agentrt::session_manager::SessionManager;

/// Trait-driven abstraction over an external memory system.
///
/// Both operations are best-effort from the executor's point of view:
/// failures are logged and the request proceeds (load) or completes (save)
/// regardless.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Load the memory state for a session, if any exists.
    async fn load(&self, session_id: &str) -> Result<Option<Value>, RuntimeError>;

    /// Persist the memory state for a session.
    async fn save(&self, session_id: &str, state: Value) -> Result<(), RuntimeError>;
}

/// Session-checkpoint-backed memory.
///
/// `load` restores the latest checkpoint payload (publishing
/// `CHECKPOINT_RESTORED` through the manager); `save` appends a new
/// checkpoint labeled `"memory"`. Deleting the session deletes the memory
/// with it, which is exactly the lifetime callers expect.
pub struct CheckpointMemory {
    sessions: Arc<SessionManager>,
}

impl CheckpointMemory {
    /// Bind to a session manager.
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl MemoryProvider for CheckpointMemory {
    async fn load(&self, session_id: &str) -> Result<Option<Value>, RuntimeError> {
        let checkpoint = self.sessions.restore_latest_checkpoint(session_id).await?;
        Ok(checkpoint.map(|c| c.payload))
    }

    async fn save(&self, session_id: &str, state: Value) -> Result<(), RuntimeError> {
        self.sessions
            .save_checkpoint(session_id, state, Some("memory".to_string()))
            .await?;
        Ok(())
    }
}

/// Process-local memory with no durability. Intended for tests.
#[derive(Default)]
pub struct EphemeralMemory {
    states: Mutex<HashMap<String, Value>>,
}

impl EphemeralMemory {
    /// Create an empty memory.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryProvider for EphemeralMemory {
    async fn load(&self, session_id: &str) -> Result<Option<Value>, RuntimeError> {
        let states = self
            .states
            .lock()
            .map_err(|_| RuntimeError::Internal("memory mutex poisoned".into()))?;
        Ok(states.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, state: Value) -> Result<(), RuntimeError> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| RuntimeError::Internal("memory mutex poisoned".into()))?;
        states.insert(session_id.to_string(), state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ephemeral_memory_round_trip() {
        let memory = EphemeralMemory::new();
        assert!(memory.load("s1").await.unwrap().is_none());

        memory
            .save("s1", serde_json::json!({"turns": 3}))
            .await
            .unwrap();
        let state = memory.load("s1").await.unwrap().unwrap();
        assert_eq!(state["turns"], 3);

        // Other sessions are unaffected
        assert!(memory.load("s2").await.unwrap().is_none());
    }
}
