//! Durable session management.
//!
//! [`SessionManager`] owns the lifecycle of [`Session`]s and their
//! [`Checkpoint`]s on top of a pluggable [`SessionStore`]: creation with
//! quota enforcement, TTL expiry (lazy on read plus a periodic sweep),
//! metadata updates, per-user/per-agent enumeration, and cascading
//! deletion that keeps every index consistent with the primary record.
//!
//! # Key layout
//!
//! ```text
//! session:{sid}                 → session record
//! session:{sid}:checkpoints     → ordered [cid]
//! session:{sid}:checkpoint:{c}  → checkpoint record
//! session:{sid}:checkpoint_seq  → monotonic cid counter
//! user:{uid}:sessions           → [sid]
//! agent:{aid}:sessions          → [sid]
//! ```
//!
//! # Concurrency
//!
//! Every mutation that touches multiple keys for one session runs under
//! that session's async mutex (a striped per-key lock map); user/agent
//! index updates run under the index key's own mutex. Reads take no lock
//! and observe last-committed state — deletion removes the primary record
//! first, so a reader that can still see the record can still traverse its
//! checkpoints. Expiry policy: mutating an expired session fails with
//! `SESSION_EXPIRED`; reading one yields `None` (and lazily deletes it).

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::agentrt::config::SessionConfig;
use crate::agentrt::error::RuntimeError;
use crate::agentrt::event::{Event, EventBus, EventType};
use crate::agentrt::metrics::MetricsCollector;
use crate::agentrt::session::{Checkpoint, CheckpointMeta, Session, SessionPatch, SessionState};
use crate::agentrt::session_store::SessionStore;

/// Why a session is being torn down — decides which event is published.
enum Teardown {
    Deleted,
    Expired,
}

/// Create/lookup/update/expire sessions; save/list/restore checkpoints;
/// enumerate by user or agent. See the module docs for layout and locking.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    bus: Option<Arc<EventBus>>,
    metrics: Option<MetricsCollector>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    /// Create a manager over `store` with default settings.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(store, SessionConfig::default())
    }

    /// Create a manager over `store` with explicit settings.
    pub fn with_config(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            bus: None,
            metrics: None,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Attach an event bus for lifecycle events (builder pattern).
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Attach a metrics collector (builder pattern).
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The configured session TTL in seconds.
    pub fn ttl_seconds(&self) -> u64 {
        self.config.ttl_seconds
    }

    // ── Session lifecycle ────────────────────────────────────────────────

    /// Create a session for `user_id` on `agent_id`.
    ///
    /// Fails with `QUOTA_EXCEEDED` once the global maximum is reached and
    /// with `VALIDATION_ERROR` on empty ids. The returned session is fully
    /// populated: `created_at = last_activity = now`,
    /// `expires_at = now + ttl`, state `ACTIVE`.
    pub async fn create_session(
        &self,
        user_id: &str,
        agent_id: &str,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<Session, RuntimeError> {
        if user_id.trim().is_empty() {
            return Err(RuntimeError::Validation("user_id must not be empty".into()));
        }
        if agent_id.trim().is_empty() {
            return Err(RuntimeError::Validation("agent_id must not be empty".into()));
        }
        if self.session_count().await? >= self.config.max_count {
            return Err(RuntimeError::QuotaExceeded(format!(
                "session limit of {} reached",
                self.config.max_count
            )));
        }

        let now = Utc::now();
        let session = Session {
            id: generate_session_id(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + chrono::Duration::seconds(self.config.ttl_seconds as i64),
            state: SessionState::Active,
            metadata: metadata.unwrap_or_default(),
        };

        {
            let lock = self.key_lock(&session_key(&session.id));
            let _guard = lock.lock().await;
            self.put_session(&session).await?;
        }
        self.index_add(&user_sessions_key(user_id), &session.id).await?;
        self.index_add(&agent_sessions_key(agent_id), &session.id).await?;

        debug!("created session {} for user {}", session.id, user_id);
        self.record(|m| m.inc_counter("sessions_created_total", &[("agent", agent_id)]));
        self.publish(
            Event::new(EventType::SessionCreated, agent_id)
                .with_user(user_id)
                .with_session(&session.id),
        )
        .await;
        Ok(session)
    }

    /// Fetch a session. Absent and expired sessions both read as `None`;
    /// an expired one is deleted lazily on the way out.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, RuntimeError> {
        match self.load_raw(session_id).await? {
            None => Ok(None),
            Some(session) if session.is_expired(Utc::now()) => {
                self.teardown_session(&session, Teardown::Expired).await?;
                Ok(None)
            }
            Some(session) => Ok(Some(session)),
        }
    }

    /// Apply a partial update: replace state if given, shallow-merge
    /// metadata, refresh `last_activity`. The TTL is unchanged. Returns
    /// `false` for absent sessions; fails with `SESSION_EXPIRED` when the
    /// session expired between lookup and update.
    pub async fn update_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<bool, RuntimeError> {
        let lock = self.key_lock(&session_key(session_id));
        let _guard = lock.lock().await;
        let mut session = match self.load_for_update(session_id).await? {
            Some(session) => session,
            None => return Ok(false),
        };
        if let Some(state) = patch.state {
            session.state = state;
        }
        if let Some(metadata) = patch.metadata {
            session.metadata.extend(metadata);
        }
        session.touch();
        self.put_session(&session).await?;
        Ok(true)
    }

    /// Shallow-merge `metadata` into the session's map.
    pub async fn update_session_metadata(
        &self,
        session_id: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<bool, RuntimeError> {
        self.update_session(
            session_id,
            SessionPatch {
                state: None,
                metadata: Some(metadata),
            },
        )
        .await
    }

    /// Push the expiry window out to `now + ttl` and refresh
    /// `last_activity`. Returns `false` for absent sessions; fails with
    /// `SESSION_EXPIRED` for expired ones.
    pub async fn refresh_session(&self, session_id: &str) -> Result<bool, RuntimeError> {
        let lock = self.key_lock(&session_key(session_id));
        let _guard = lock.lock().await;
        let mut session = match self.load_for_update(session_id).await? {
            Some(session) => session,
            None => return Ok(false),
        };
        session.touch();
        session.expires_at =
            Utc::now() + chrono::Duration::seconds(self.config.ttl_seconds as i64);
        self.put_session(&session).await?;
        Ok(true)
    }

    /// Set the lifecycle state.
    pub async fn set_session_state(
        &self,
        session_id: &str,
        state: SessionState,
    ) -> Result<bool, RuntimeError> {
        self.update_session(
            session_id,
            SessionPatch {
                state: Some(state),
                metadata: None,
            },
        )
        .await
    }

    /// Read the lifecycle state, `None` for absent/expired sessions.
    pub async fn get_session_state(
        &self,
        session_id: &str,
    ) -> Result<Option<SessionState>, RuntimeError> {
        Ok(self.get_session(session_id).await?.map(|s| s.state))
    }

    /// Delete a session, all its checkpoints, and its index entries, as one
    /// atomic-appearing operation. Returns whether the session existed.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, RuntimeError> {
        let session = match self.load_raw(session_id).await? {
            Some(session) => session,
            None => return Ok(false),
        };
        self.teardown_session(&session, Teardown::Deleted).await?;
        Ok(true)
    }

    /// Live (non-expired) sessions owned by `user_id`, optionally filtered
    /// by state. Dead index entries are pruned on the way through.
    pub async fn get_sessions_by_user(
        &self,
        user_id: &str,
        status: Option<SessionState>,
    ) -> Result<Vec<Session>, RuntimeError> {
        let index_key = user_sessions_key(user_id);
        let ids = self.index_read(&index_key).await?;
        let mut sessions = Vec::new();
        for sid in ids {
            match self.get_session(&sid).await? {
                Some(session) => {
                    if status.map_or(true, |s| session.state == s) {
                        sessions.push(session);
                    }
                }
                None => {
                    // get_session already tore down expired entries; drop
                    // the dangling index reference too.
                    self.index_remove(&index_key, &sid).await?;
                }
            }
        }
        Ok(sessions)
    }

    /// Delete every session owned by `user_id`. Returns the count deleted.
    pub async fn delete_user_sessions(&self, user_id: &str) -> Result<usize, RuntimeError> {
        let ids = self.index_read(&user_sessions_key(user_id)).await?;
        let mut deleted = 0;
        for sid in ids {
            if self.delete_session(&sid).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Delete every session bound to `agent_id`. Returns the count deleted.
    pub async fn delete_agent_sessions(&self, agent_id: &str) -> Result<usize, RuntimeError> {
        let ids = self.index_read(&agent_sessions_key(agent_id)).await?;
        let mut deleted = 0;
        for sid in ids {
            if self.delete_session(&sid).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> Result<usize, RuntimeError> {
        let keys = self.store.keys("session:*").await?;
        let mut count = 0;
        for key in keys {
            if let Some(sid) = primary_session_id(&key) {
                // Expired-but-unswept records don't count against quota.
                if let Some(session) = self.load_raw(sid).await? {
                    if !session.is_expired(Utc::now()) {
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }

    /// Sweep the store, tearing down every expired session. Idempotent and
    /// safe to interleave with live traffic. Returns the number removed.
    pub async fn cleanup_expired_sessions(&self) -> Result<usize, RuntimeError> {
        let keys = self.store.keys("session:*").await?;
        let now = Utc::now();
        let mut removed = 0;
        for key in keys {
            let sid = match primary_session_id(&key) {
                Some(sid) => sid.to_string(),
                None => continue,
            };
            if let Some(session) = self.load_raw(&sid).await? {
                if session.is_expired(now) {
                    self.teardown_session(&session, Teardown::Expired).await?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("cleanup sweep removed {} expired sessions", removed);
        }
        Ok(removed)
    }

    /// Run [`cleanup_expired_sessions`] on the configured interval until the
    /// returned handle is aborted. Sweep failures are logged and the loop
    /// continues.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let period = std::time::Duration::from_secs(manager.config.cleanup_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a fresh manager
            // is not swept at startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = manager.cleanup_expired_sessions().await {
                    warn!("session cleanup sweep failed: {}", err);
                }
            }
        })
    }

    // ── Checkpoints ──────────────────────────────────────────────────────

    /// Save a checkpoint of `payload` for the session, returning the new
    /// monotonic checkpoint id. Fails with `SESSION_NOT_FOUND` for absent
    /// sessions and `SESSION_EXPIRED` for expired ones.
    ///
    /// The whole commit (payload write, index append, activity touch) runs
    /// under the session lock with no cancellation point inside, so a
    /// cancelled caller observes either the full checkpoint or none of it.
    pub async fn save_checkpoint(
        &self,
        session_id: &str,
        payload: Value,
        label: Option<String>,
    ) -> Result<String, RuntimeError> {
        let lock = self.key_lock(&session_key(session_id));
        let _guard = lock.lock().await;
        let mut session = self
            .load_for_update(session_id)
            .await?
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))?;

        let seq = self
            .store
            .increment(&checkpoint_seq_key(session_id), 1)
            .await?;
        let cid = format!("cp_{:06}", seq);
        let checkpoint = Checkpoint::new(cid.clone(), session_id, payload, label);

        self.store
            .put(
                &checkpoint_key(session_id, &cid),
                serde_json::to_value(&checkpoint)
                    .map_err(|e| RuntimeError::Store(format!("encode checkpoint: {}", e)))?,
                None,
            )
            .await?;
        let mut index = self.index_read(&checkpoints_key(session_id)).await?;
        index.push(cid.clone());
        self.index_write(&checkpoints_key(session_id), &index).await?;
        session.touch();
        self.put_session(&session).await?;

        self.record(|m| m.inc_counter("checkpoints_saved_total", &[("agent", &session.agent_id)]));
        self.publish(
            Event::new(EventType::CheckpointSaved, &session.agent_id)
                .with_user(&session.user_id)
                .with_session(session_id)
                .with_metadata("checkpoint_id", Value::String(cid.clone())),
        )
        .await;
        Ok(cid)
    }

    /// Fetch one checkpoint. `None` when the session or checkpoint is
    /// absent (or the session expired). A payload failing its integrity
    /// hash is still returned, with a warning logged.
    pub async fn get_checkpoint(
        &self,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>, RuntimeError> {
        if self.get_session(session_id).await?.is_none() {
            return Ok(None);
        }
        let value = match self.store.get(&checkpoint_key(session_id, checkpoint_id)).await? {
            Some(value) => value,
            None => return Ok(None),
        };
        let checkpoint: Checkpoint = serde_json::from_value(value)
            .map_err(|e| RuntimeError::Store(format!("decode checkpoint: {}", e)))?;
        if !checkpoint.verify_integrity() {
            warn!(
                "checkpoint {}/{} failed its integrity hash",
                session_id, checkpoint_id
            );
        }
        Ok(Some(checkpoint))
    }

    /// The checkpoint with the greatest creation time, if any.
    pub async fn get_latest_checkpoint(
        &self,
        session_id: &str,
    ) -> Result<Option<Checkpoint>, RuntimeError> {
        let index = self.index_read(&checkpoints_key(session_id)).await?;
        match index.last() {
            Some(cid) => self.get_checkpoint(session_id, cid).await,
            None => Ok(None),
        }
    }

    /// Checkpoint listing metadata, in save order.
    pub async fn list_checkpoints(
        &self,
        session_id: &str,
    ) -> Result<Vec<CheckpointMeta>, RuntimeError> {
        let index = self.index_read(&checkpoints_key(session_id)).await?;
        let mut metas = Vec::with_capacity(index.len());
        for cid in index {
            if let Some(checkpoint) = self.get_checkpoint(session_id, &cid).await? {
                metas.push(checkpoint.meta());
            }
        }
        Ok(metas)
    }

    /// Delete one checkpoint. Returns whether it existed.
    pub async fn delete_checkpoint(
        &self,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<bool, RuntimeError> {
        let lock = self.key_lock(&session_key(session_id));
        let _guard = lock.lock().await;
        if self.load_for_update(session_id).await?.is_none() {
            return Ok(false);
        }
        let existed = self
            .store
            .delete(&checkpoint_key(session_id, checkpoint_id))
            .await?;
        if existed {
            let mut index = self.index_read(&checkpoints_key(session_id)).await?;
            index.retain(|cid| cid != checkpoint_id);
            self.index_write(&checkpoints_key(session_id), &index).await?;
        }
        Ok(existed)
    }

    /// Delete every checkpoint of the session. Returns the count removed.
    pub async fn clear_checkpoints(&self, session_id: &str) -> Result<usize, RuntimeError> {
        let lock = self.key_lock(&session_key(session_id));
        let _guard = lock.lock().await;
        if self.load_for_update(session_id).await?.is_none() {
            return Ok(0);
        }
        let index = self.index_read(&checkpoints_key(session_id)).await?;
        let mut removed = 0;
        for cid in &index {
            if self.store.delete(&checkpoint_key(session_id, cid)).await? {
                removed += 1;
            }
        }
        self.store.delete(&checkpoints_key(session_id)).await?;
        Ok(removed)
    }

    /// Restore one checkpoint, publishing `CHECKPOINT_RESTORED`.
    pub async fn restore_checkpoint(
        &self,
        session_id: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>, RuntimeError> {
        let checkpoint = self.get_checkpoint(session_id, checkpoint_id).await?;
        if let Some(checkpoint) = &checkpoint {
            self.announce_restore(session_id, checkpoint).await?;
        }
        Ok(checkpoint)
    }

    /// Restore the latest checkpoint, publishing `CHECKPOINT_RESTORED`.
    /// This is the executor's memory-load entry point.
    pub async fn restore_latest_checkpoint(
        &self,
        session_id: &str,
    ) -> Result<Option<Checkpoint>, RuntimeError> {
        let checkpoint = self.get_latest_checkpoint(session_id).await?;
        if let Some(checkpoint) = &checkpoint {
            self.announce_restore(session_id, checkpoint).await?;
        }
        Ok(checkpoint)
    }

    async fn announce_restore(
        &self,
        session_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), RuntimeError> {
        let session = self.get_session(session_id).await?;
        let agent_id = session.as_ref().map(|s| s.agent_id.clone()).unwrap_or_default();
        self.record(|m| m.inc_counter("checkpoints_restored_total", &[("agent", &agent_id)]));
        self.publish(
            Event::new(EventType::CheckpointRestored, agent_id)
                .with_session(session_id)
                .with_metadata("checkpoint_id", Value::String(checkpoint.id.clone())),
        )
        .await;
        Ok(())
    }

    // ── Internal plumbing ────────────────────────────────────────────────

    /// Raw load: decodes the primary record without expiry handling.
    async fn load_raw(&self, session_id: &str) -> Result<Option<Session>, RuntimeError> {
        match self.store.get(&session_key(session_id)).await? {
            Some(value) => {
                let session: Session = serde_json::from_value(value)
                    .map_err(|e| RuntimeError::Store(format!("decode session: {}", e)))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Load for mutation under the caller-held session lock: absent →
    /// `None`, expired → `SESSION_EXPIRED` (the canonical TTL-race error).
    async fn load_for_update(&self, session_id: &str) -> Result<Option<Session>, RuntimeError> {
        match self.load_raw(session_id).await? {
            None => Ok(None),
            Some(session) if session.is_expired(Utc::now()) => {
                Err(RuntimeError::SessionExpired(session_id.to_string()))
            }
            Some(session) => Ok(Some(session)),
        }
    }

    async fn put_session(&self, session: &Session) -> Result<(), RuntimeError> {
        let value = serde_json::to_value(session)
            .map_err(|e| RuntimeError::Store(format!("encode session: {}", e)))?;
        self.store.put(&session_key(&session.id), value, None).await
    }

    /// Tear a session down: primary record first (so concurrent readers
    /// stop seeing it), then checkpoints, then index entries.
    async fn teardown_session(
        &self,
        session: &Session,
        reason: Teardown,
    ) -> Result<(), RuntimeError> {
        let sid = &session.id;
        {
            let lock = self.key_lock(&session_key(sid));
            let _guard = lock.lock().await;
            // Re-check under the lock: a racing teardown may have won.
            if self.load_raw(sid).await?.is_none() {
                return Ok(());
            }
            self.store.delete(&session_key(sid)).await?;
            let index = self.index_read(&checkpoints_key(sid)).await?;
            for cid in &index {
                self.store.delete(&checkpoint_key(sid, cid)).await?;
            }
            self.store.delete(&checkpoints_key(sid)).await?;
            self.store.delete(&checkpoint_seq_key(sid)).await?;
        }
        self.index_remove(&user_sessions_key(&session.user_id), sid).await?;
        self.index_remove(&agent_sessions_key(&session.agent_id), sid).await?;
        self.drop_key_lock(&session_key(sid));

        let (event_type, counter) = match reason {
            Teardown::Deleted => (EventType::SessionDeleted, "sessions_deleted_total"),
            Teardown::Expired => (EventType::SessionExpired, "sessions_expired_total"),
        };
        debug!("tore down session {} ({})", sid, event_type.as_str());
        self.record(|m| m.inc_counter(counter, &[("agent", &session.agent_id)]));
        self.publish(
            Event::new(event_type, &session.agent_id)
                .with_user(&session.user_id)
                .with_session(sid),
        )
        .await;
        Ok(())
    }

    async fn index_read(&self, key: &str) -> Result<Vec<String>, RuntimeError> {
        match self.store.get(key).await? {
            Some(Value::Array(items)) => Ok(items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()),
            Some(_) => Err(RuntimeError::Store(format!("index '{}' is not an array", key))),
            None => Ok(Vec::new()),
        }
    }

    async fn index_write(&self, key: &str, ids: &[String]) -> Result<(), RuntimeError> {
        if ids.is_empty() {
            self.store.delete(key).await?;
            return Ok(());
        }
        let value = Value::Array(ids.iter().map(|s| Value::String(s.clone())).collect());
        self.store.put(key, value, None).await
    }

    async fn index_add(&self, key: &str, id: &str) -> Result<(), RuntimeError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        let mut ids = self.index_read(key).await?;
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
            self.index_write(key, &ids).await?;
        }
        Ok(())
    }

    async fn index_remove(&self, key: &str, id: &str) -> Result<(), RuntimeError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        let mut ids = self.index_read(key).await?;
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() != before {
            self.index_write(key, &ids).await?;
        }
        Ok(())
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.key_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn drop_key_lock(&self, key: &str) {
        let mut locks = match self.key_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.remove(key);
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

/// `sess_` + 32 hex chars from 16 CSPRNG bytes: 128 bits of entropy,
/// URL-safe, prefixed for debuggability.
fn generate_session_id() -> String {
    let bytes: [u8; 16] = rand::random();
    format!("sess_{}", hex::encode(bytes))
}

fn session_key(sid: &str) -> String {
    format!("session:{}", sid)
}

fn checkpoints_key(sid: &str) -> String {
    format!("session:{}:checkpoints", sid)
}

fn checkpoint_key(sid: &str, cid: &str) -> String {
    format!("session:{}:checkpoint:{}", sid, cid)
}

fn checkpoint_seq_key(sid: &str) -> String {
    format!("session:{}:checkpoint_seq", sid)
}

fn user_sessions_key(uid: &str) -> String {
    format!("user:{}:sessions", uid)
}

fn agent_sessions_key(aid: &str) -> String {
    format!("agent:{}:sessions", aid)
}

/// For a primary record key `session:{sid}`, the sid; `None` for
/// checkpoint/index keys under the same prefix.
fn primary_session_id(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("session:")?;
    if rest.is_empty() || rest.contains(':') {
        None
    } else {
        Some(rest)
    }
}
