// src/lib.rs

// Import the top-level `agentrt` module.
pub mod agentrt;

// Re-export the module tree and key types at the crate root so callers can
// write agentrt::executor::AgentExecutor (or just agentrt::AgentExecutor)
// without navigating the internal hierarchy.
pub use crate::agentrt::*;
