//! Session and checkpoint data model.
//!
//! A [`Session`] is the durable context binding one user to one agent across
//! requests; a [`Checkpoint`] is an ordered snapshot of session payload that
//! can be restored to resume prior context. Both serialize to JSON for the
//! backing [`SessionStore`](crate::session_store::SessionStore).
//!
//! Checkpoints carry a SHA-256 hash of their canonical payload encoding so
//! that a restore can detect store-side corruption; see
//! [`Checkpoint::verify_integrity`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// The session is live and serving requests.
    Active,
    /// The session is live but has not served a request recently.
    Idle,
    /// The session is retained for its history only.
    Archived,
    /// The session's TTL elapsed. Transitional — expired sessions read as
    /// absent and are deleted lazily or by the cleanup sweep.
    Expired,
}

/// A durable user↔agent context.
///
/// Invariant: `created_at <= last_activity <= expires_at` for any session
/// observable through the manager; a session whose `expires_at` has passed
/// is treated as absent everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session id (`sess_` + 32 hex chars).
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Agent this session is bound to.
    pub agent_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation or execution touching this session.
    pub last_activity: DateTime<Utc>,
    /// Absolute expiry time.
    pub expires_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: SessionState,
    /// Free-form session annotations.
    pub metadata: HashMap<String, Value>,
}

impl Session {
    /// Whether the session is expired at `now`. A read exactly at
    /// `expires_at` is already absent.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Refresh `last_activity` to now, clamped so the documented ordering
    /// invariant holds even against clock oddities.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now >= self.created_at {
            self.last_activity = now;
        }
    }
}

/// Payload-free checkpoint listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Checkpoint id, unique and monotonic within its session.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optional human-readable label.
    pub label: Option<String>,
}

/// An ordered snapshot of session payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id, unique and monotonic within its session.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Creation time. `latest` is the checkpoint with the greatest one.
    pub created_at: DateTime<Utc>,
    /// Optional human-readable label.
    pub label: Option<String>,
    /// Arbitrarily nested snapshot payload.
    pub payload: Value,
    /// SHA-256 hex of the canonical payload encoding.
    pub content_hash: String,
}

impl Checkpoint {
    /// Build a checkpoint, computing the payload hash.
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        payload: Value,
        label: Option<String>,
    ) -> Self {
        let content_hash = payload_hash(&payload);
        Self {
            id: id.into(),
            session_id: session_id.into(),
            created_at: Utc::now(),
            label,
            payload,
            content_hash,
        }
    }

    /// Whether the stored payload still matches its recorded hash.
    pub fn verify_integrity(&self) -> bool {
        payload_hash(&self.payload) == self.content_hash
    }

    /// The listing form of this checkpoint.
    pub fn meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            id: self.id.clone(),
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            label: self.label.clone(),
        }
    }
}

/// SHA-256 hex of a payload's canonical JSON encoding.
fn payload_hash(payload: &Value) -> String {
    let canonical = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Partial update applied by `update_session`.
///
/// `metadata` entries are shallow-merged into the session's map; `state`
/// replaces the lifecycle state when present.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    /// New lifecycle state, if changing.
    pub state: Option<SessionState>,
    /// Metadata entries to merge in.
    pub metadata: Option<HashMap<String, Value>>,
}
