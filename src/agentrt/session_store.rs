//! Session store abstraction and the in-memory backend.
//!
//! [`SessionStore`] is the narrow key-value contract the
//! [`SessionManager`](crate::session_manager::SessionManager) is written
//! against: JSON values, optional per-key TTL, `*`-wildcard key scans, and
//! an atomic counter primitive. Production deployments back it with a
//! distributed store (Redis or similar) outside this crate; the
//! [`InMemorySessionStore`] here is strictly serializable (one mutex) and
//! is the backend used by tests and single-process embedders.
//!
//! Expiry in the in-memory backend is lazy: expired entries are invisible
//! to every read and are physically evicted on access. The periodic sweep
//! lives one level up, in the session manager.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::agentrt::error::RuntimeError;

/// Trait-driven abstraction over the runtime's session storage backend.
///
/// All operations are infallible in the in-memory backend; distributed
/// backends surface I/O problems as [`RuntimeError::Store`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store `value` under `key`, replacing any prior value. A `ttl` makes
    /// the key invisible (and collectable) once it elapses.
    async fn put(&self, key: &str, value: Value, ttl_seconds: Option<u64>)
        -> Result<(), RuntimeError>;

    /// Fetch the value under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, RuntimeError>;

    /// Remove `key`. Returns whether a live value existed.
    async fn delete(&self, key: &str) -> Result<bool, RuntimeError>;

    /// Whether a live value exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, RuntimeError>;

    /// All live keys matching `pattern` (`*` matches any run of characters).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, RuntimeError>;

    /// Atomically add `delta` to the integer at `key` (0 when absent) and
    /// return the new value. Fails with `STORE_ERROR` if the existing value
    /// is not an integer.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, RuntimeError>;

    /// Reset the TTL of an existing key. Returns whether the key was live.
    async fn set_ttl(&self, key: &str, ttl_seconds: u64) -> Result<bool, RuntimeError>;
}

/// Match `key` against `pattern`, where `*` matches any (possibly empty)
/// run of characters.
pub(crate) fn key_matches(pattern: &str, key: &str) -> bool {
    fn matches(p: &[u8], k: &[u8]) -> bool {
        match p.first() {
            None => k.is_empty(),
            Some(b'*') => {
                // Greedy with backtracking: try every split point.
                (0..=k.len()).any(|i| matches(&p[1..], &k[i..]))
            }
            Some(c) => k.first() == Some(c) && matches(&p[1..], &k[1..]),
        }
    }
    matches(pattern.as_bytes(), key.as_bytes())
}

struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => expiry <= now,
            None => false,
        }
    }
}

/// Mutex-guarded TTL-aware map. Strictly serializable: every operation
/// observes the store at a single point in time.
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries (evicts expired ones first).
    pub fn len(&self) -> usize {
        let mut entries = self.lock();
        let now = Utc::now();
        entries.retain(|_, e| !e.is_expired(now));
        entries.len()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(
        &self,
        key: &str,
        value: Value,
        ttl_seconds: Option<u64>,
    ) -> Result<(), RuntimeError> {
        let now = Utc::now();
        let expires_at = ttl_seconds.map(|ttl| now + chrono::Duration::seconds(ttl as i64));
        let mut entries = self.lock();
        entries.insert(
            key.to_string(),
            Entry { value, expires_at },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, RuntimeError> {
        let now = Utc::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, RuntimeError> {
        let now = Utc::now();
        let mut entries = self.lock();
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, RuntimeError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, RuntimeError> {
        let now = Utc::now();
        let mut entries = self.lock();
        entries.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| key_matches(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, RuntimeError> {
        let now = Utc::now();
        let mut entries = self.lock();
        let current = match entries.get(key) {
            Some(entry) if entry.is_expired(now) => 0,
            Some(entry) => entry
                .value
                .as_i64()
                .ok_or_else(|| RuntimeError::Store(format!("key '{}' is not an integer", key)))?,
            None => 0,
        };
        let updated = current + delta;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::from(updated),
                expires_at: None,
            },
        );
        Ok(updated)
    }

    async fn set_ttl(&self, key: &str, ttl_seconds: u64) -> Result<bool, RuntimeError> {
        let now = Utc::now();
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + chrono::Duration::seconds(ttl_seconds as i64));
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pattern_matching() {
        assert!(key_matches("session:*", "session:sess_abc"));
        assert!(key_matches("user:*:sessions", "user:u1:sessions"));
        assert!(!key_matches("user:*:sessions", "agent:a1:sessions"));
        assert!(key_matches("*", "anything"));
        assert!(key_matches("exact", "exact"));
        assert!(!key_matches("exact", "exactly"));
        assert!(key_matches("session:*:checkpoint:*", "session:s:checkpoint:cp_1"));
    }

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let store = InMemorySessionStore::new();
        store
            .put("k", serde_json::json!({"a": 1}), None)
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().unwrap()["a"], 1);
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy_but_invisible() {
        let store = InMemorySessionStore::new();
        store
            .put("gone", serde_json::json!(1), Some(0))
            .await
            .unwrap();
        assert!(store.get("gone").await.unwrap().is_none());
        assert!(!store.exists("gone").await.unwrap());
        assert!(store.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_increment_is_atomic_and_typed() {
        let store = InMemorySessionStore::new();
        assert_eq!(store.increment("seq", 1).await.unwrap(), 1);
        assert_eq!(store.increment("seq", 2).await.unwrap(), 3);
        assert_eq!(store.increment("seq", -3).await.unwrap(), 0);

        store.put("text", serde_json::json!("x"), None).await.unwrap();
        let err = store.increment("text", 1).await.unwrap_err();
        assert_eq!(err.error_type(), "STORE_ERROR");
    }

    #[tokio::test]
    async fn test_set_ttl_on_live_and_dead_keys() {
        let store = InMemorySessionStore::new();
        store.put("k", serde_json::json!(1), None).await.unwrap();
        assert!(store.set_ttl("k", 3600).await.unwrap());
        assert!(!store.set_ttl("missing", 3600).await.unwrap());
    }
}
