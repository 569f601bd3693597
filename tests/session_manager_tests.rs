use agentrt::config::SessionConfig;
use agentrt::error::RuntimeError;
use agentrt::event::{Event, EventBus, EventHandler, EventType};
use agentrt::session::{SessionPatch, SessionState};
use agentrt::session_manager::SessionManager;
use agentrt::session_store::InMemorySessionStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn manager() -> SessionManager {
    let _ = env_logger::builder().is_test(true).try_init();
    SessionManager::new(Arc::new(InMemorySessionStore::new()))
}

fn manager_with_ttl(ttl_seconds: u64) -> SessionManager {
    SessionManager::with_config(
        Arc::new(InMemorySessionStore::new()),
        SessionConfig {
            ttl_seconds,
            ..SessionConfig::default()
        },
    )
}

#[tokio::test]
async fn test_created_session_is_fully_populated() {
    let manager = manager();
    let session = manager
        .create_session("user-1", "agent-1", None)
        .await
        .unwrap();

    assert!(session.id.starts_with("sess_"));
    assert_eq!(session.state, SessionState::Active);
    assert!(session.created_at <= session.last_activity);
    assert!(session.last_activity <= session.expires_at);

    let loaded = manager.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, session.id);
    assert_eq!(loaded.user_id, "user-1");
    assert_eq!(loaded.agent_id, "agent-1");
    assert_eq!(loaded.state, SessionState::Active);
}

#[tokio::test]
async fn test_session_expiry_lazy_and_swept() {
    let manager = manager_with_ttl(1);
    let s1 = manager.create_session("u", "a", None).await.unwrap();
    let s2 = manager.create_session("u", "a", None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(manager.get_session(&s1.id).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    // Lazy path: the read observes absence and tears the session down.
    assert!(manager.get_session(&s1.id).await.unwrap().is_none());
    // Sweep path: collects the other expired session.
    assert!(manager.cleanup_expired_sessions().await.unwrap() >= 1);
    assert!(manager.get_session(&s2.id).await.unwrap().is_none());
    assert_eq!(manager.session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_checkpoint_round_trip_and_latest() {
    let manager = manager();
    let session = manager.create_session("u", "a", None).await.unwrap();

    let payload1 = serde_json::json!({"turn": 1, "history": [{"role": "user", "content": "Hi"}]});
    let cid1 = manager
        .save_checkpoint(&session.id, payload1.clone(), None)
        .await
        .unwrap();

    let latest = manager
        .get_latest_checkpoint(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, cid1);
    assert_eq!(latest.payload, payload1);
    assert!(latest.verify_integrity());

    let cid2 = manager
        .save_checkpoint(&session.id, serde_json::json!({"turn": 2}), Some("second".into()))
        .await
        .unwrap();
    assert!(cid2 > cid1);

    let listing = manager.list_checkpoints(&session.id).await.unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].id, cid1);
    assert_eq!(listing[1].id, cid2);
    assert_eq!(listing[1].label.as_deref(), Some("second"));

    let latest = manager
        .get_latest_checkpoint(&session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.payload, serde_json::json!({"turn": 2}));
}

#[tokio::test]
async fn test_delete_session_cascades_to_checkpoints_and_indexes() {
    let manager = manager();
    let session = manager.create_session("u", "a", None).await.unwrap();
    let cid = manager
        .save_checkpoint(&session.id, serde_json::json!({"x": 1}), None)
        .await
        .unwrap();

    assert!(manager.delete_session(&session.id).await.unwrap());
    assert!(manager.get_session(&session.id).await.unwrap().is_none());
    assert!(manager
        .get_checkpoint(&session.id, &cid)
        .await
        .unwrap()
        .is_none());
    assert!(manager
        .get_latest_checkpoint(&session.id)
        .await
        .unwrap()
        .is_none());
    assert!(manager
        .get_sessions_by_user("u", None)
        .await
        .unwrap()
        .is_empty());
    assert!(!manager.delete_session(&session.id).await.unwrap());
}

#[tokio::test]
async fn test_recreate_yields_distinct_id() {
    let manager = manager();
    let first = manager.create_session("u", "a", None).await.unwrap();
    manager.delete_session(&first.id).await.unwrap();
    let second = manager.create_session("u", "a", None).await.unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_quota_enforced() {
    let manager = SessionManager::with_config(
        Arc::new(InMemorySessionStore::new()),
        SessionConfig {
            max_count: 2,
            ..SessionConfig::default()
        },
    );
    manager.create_session("u", "a", None).await.unwrap();
    manager.create_session("u", "a", None).await.unwrap();
    let err = manager.create_session("u", "a", None).await.unwrap_err();
    assert_eq!(err.error_type(), "QUOTA_EXCEEDED");
}

#[tokio::test]
async fn test_update_merges_metadata_and_keeps_ttl() {
    let manager = manager();
    let mut initial = HashMap::new();
    initial.insert("kept".to_string(), serde_json::json!("yes"));
    let session = manager
        .create_session("u", "a", Some(initial))
        .await
        .unwrap();

    let mut update = HashMap::new();
    update.insert("added".to_string(), serde_json::json!(1));
    assert!(manager
        .update_session_metadata(&session.id, update)
        .await
        .unwrap());

    let loaded = manager.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(loaded.metadata["kept"], "yes");
    assert_eq!(loaded.metadata["added"], 1);
    assert_eq!(loaded.expires_at, session.expires_at);
    assert!(loaded.last_activity >= session.last_activity);

    // Absent sessions update to false, not an error.
    assert!(!manager
        .update_session("sess_missing", SessionPatch::default())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_refresh_extends_expiry() {
    let manager = manager_with_ttl(2);
    let session = manager.create_session("u", "a", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(manager.refresh_session(&session.id).await.unwrap());
    let refreshed = manager.get_session(&session.id).await.unwrap().unwrap();
    assert!(refreshed.expires_at > session.expires_at);
    assert!(!manager.refresh_session("sess_missing").await.unwrap());
}

#[tokio::test]
async fn test_mutating_expired_session_is_session_expired() {
    let manager = manager_with_ttl(1);
    let session = manager.create_session("u", "a", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let err = manager
        .save_checkpoint(&session.id, serde_json::json!({}), None)
        .await
        .unwrap_err();
    assert_eq!(err.error_type(), "SESSION_EXPIRED");
}

#[tokio::test]
async fn test_save_checkpoint_on_missing_session() {
    let manager = manager();
    let err = manager
        .save_checkpoint("sess_missing", serde_json::json!({}), None)
        .await
        .unwrap_err();
    assert_eq!(err.error_type(), "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_sessions_by_user_with_status_filter() {
    let manager = manager();
    let s1 = manager.create_session("alice", "a", None).await.unwrap();
    let s2 = manager.create_session("alice", "a", None).await.unwrap();
    manager.create_session("bob", "a", None).await.unwrap();

    manager
        .set_session_state(&s2.id, SessionState::Idle)
        .await
        .unwrap();
    assert_eq!(
        manager.get_session_state(&s2.id).await.unwrap(),
        Some(SessionState::Idle)
    );

    let all = manager.get_sessions_by_user("alice", None).await.unwrap();
    assert_eq!(all.len(), 2);

    let idle = manager
        .get_sessions_by_user("alice", Some(SessionState::Idle))
        .await
        .unwrap();
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0].id, s2.id);

    let active = manager
        .get_sessions_by_user("alice", Some(SessionState::Active))
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, s1.id);
}

#[tokio::test]
async fn test_delete_by_user_and_agent() {
    let manager = manager();
    manager.create_session("alice", "a1", None).await.unwrap();
    manager.create_session("alice", "a2", None).await.unwrap();
    manager.create_session("bob", "a2", None).await.unwrap();

    assert_eq!(manager.delete_user_sessions("alice").await.unwrap(), 2);
    assert_eq!(manager.session_count().await.unwrap(), 1);
    assert_eq!(manager.delete_agent_sessions("a2").await.unwrap(), 1);
    assert_eq!(manager.session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_and_clear_checkpoints() {
    let manager = manager();
    let session = manager.create_session("u", "a", None).await.unwrap();
    let cid1 = manager
        .save_checkpoint(&session.id, serde_json::json!({"n": 1}), None)
        .await
        .unwrap();
    manager
        .save_checkpoint(&session.id, serde_json::json!({"n": 2}), None)
        .await
        .unwrap();

    assert!(manager.delete_checkpoint(&session.id, &cid1).await.unwrap());
    assert!(!manager.delete_checkpoint(&session.id, &cid1).await.unwrap());
    assert_eq!(manager.list_checkpoints(&session.id).await.unwrap().len(), 1);

    let cleared = manager.clear_checkpoints(&session.id).await.unwrap();
    assert_eq!(cleared, 1);
    assert!(manager
        .get_latest_checkpoint(&session.id)
        .await
        .unwrap()
        .is_none());

    // Checkpoint ids stay monotonic even after clearing.
    let cid3 = manager
        .save_checkpoint(&session.id, serde_json::json!({"n": 3}), None)
        .await
        .unwrap();
    assert!(cid3 > cid1);
}

struct TypeRecorder {
    seen: Mutex<Vec<EventType>>,
}

#[async_trait]
impl EventHandler for TypeRecorder {
    async fn handle_event(&self, event: &Event) -> Result<(), RuntimeError> {
        self.seen.lock().unwrap().push(event.event_type);
        Ok(())
    }
}

#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let bus = Arc::new(EventBus::new());
    let recorder = Arc::new(TypeRecorder {
        seen: Mutex::new(Vec::new()),
    });
    bus.subscribe(EventType::Any, recorder.clone()).await;

    let manager =
        SessionManager::new(Arc::new(InMemorySessionStore::new())).with_event_bus(bus.clone());
    let session = manager.create_session("u", "a", None).await.unwrap();
    manager
        .save_checkpoint(&session.id, serde_json::json!({"x": 1}), None)
        .await
        .unwrap();
    manager
        .restore_latest_checkpoint(&session.id)
        .await
        .unwrap()
        .unwrap();
    manager.delete_session(&session.id).await.unwrap();

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            EventType::SessionCreated,
            EventType::CheckpointSaved,
            EventType::CheckpointRestored,
            EventType::SessionDeleted,
        ]
    );
}

#[tokio::test]
async fn test_cleanup_task_runs_periodically() {
    let manager = Arc::new(SessionManager::with_config(
        Arc::new(InMemorySessionStore::new()),
        SessionConfig {
            ttl_seconds: 1,
            cleanup_interval_seconds: 1,
            ..SessionConfig::default()
        },
    ));
    manager.create_session("u", "a", None).await.unwrap();

    let handle = manager.spawn_cleanup_task();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(manager.session_count().await.unwrap(), 0);
    handle.abort();
}
