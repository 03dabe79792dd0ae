use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use sentra_authz::{
    AuthzError, CacheConfig, RemoteValidator, TransportError, ValidationCache,
};

/// Replays a queue of scripted responses and counts calls.
struct ScriptedValidator {
    calls: AtomicUsize,
    responses: Mutex<VecDeque<Result<Value, TransportError>>>,
}

impl ScriptedValidator {
    fn new(responses: Vec<Result<Value, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            responses: Mutex::new(responses.into_iter().collect()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteValidator for ScriptedValidator {
    async fn validate(&self, _credential: &str) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("script exhausted")))
    }
}

fn ok_response(id: &str) -> Result<Value, TransportError> {
    Ok(json!({
        "id": id,
        "access": ["authx:user.abc:r"],
        "user": { "id": "user-1" }
    }))
}

fn config() -> CacheConfig {
    CacheConfig {
        token_refresh: Duration::from_secs(30),
        token_expiry: Duration::from_secs(100),
    }
}

async fn settle() {
    // Lets spawned refresh tasks run; paused time auto-advances.
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_fresh_hits_are_served_locally() {
    let validator = ScriptedValidator::new(vec![ok_response("tok-1")]);
    let cache = ValidationCache::new(validator.clone(), config(), None);

    let token = cache.get("cred").await.unwrap();
    assert_eq!(token.id, "tok-1");
    assert_eq!(validator.calls(), 1);

    tokio::time::advance(Duration::from_secs(14)).await;
    let token = cache.get("cred").await.unwrap();
    assert_eq!(token.id, "tok-1");
    assert_eq!(validator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_hit_serves_and_refreshes_once() {
    let validator = ScriptedValidator::new(vec![ok_response("tok-1"), ok_response("tok-2")]);
    let cache = ValidationCache::new(validator.clone(), config(), None);

    cache.get("cred").await.unwrap();
    tokio::time::advance(Duration::from_secs(40)).await;

    // Stale but unexpired: the old value comes back synchronously and
    // exactly one refetch runs in the background.
    let token = cache.get("cred").await.unwrap();
    assert_eq!(token.id, "tok-1");
    let token = cache.get("cred").await.unwrap();
    assert_eq!(token.id, "tok-1");

    settle().await;
    assert_eq!(validator.calls(), 2);

    let token = cache.get("cred").await.unwrap();
    assert_eq!(token.id, "tok-2");
    assert_eq!(validator.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_serves_stale_until_expiry() {
    let validator = ScriptedValidator::new(vec![
        ok_response("tok-1"),
        Err(TransportError::new("connection refused")),
        Err(TransportError::new("connection refused")),
        Err(TransportError::new("connection refused")),
    ]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cache = ValidationCache::new(validator.clone(), config(), Some(tx));

    cache.get("cred").await.unwrap();

    tokio::time::advance(Duration::from_secs(40)).await;
    let token = cache.get("cred").await.unwrap();
    assert_eq!(token.id, "tok-1");
    settle().await;
    assert_eq!(validator.calls(), 2);
    assert_eq!(rx.recv().await.unwrap().message, "connection refused");

    // The failed refresh marks the entry for an immediate retry.
    tokio::time::advance(Duration::from_secs(10)).await;
    let token = cache.get("cred").await.unwrap();
    assert_eq!(token.id, "tok-1");
    settle().await;
    assert_eq!(validator.calls(), 3);

    // Past expiry since the last success the entry is gone and the
    // inline revalidation failure surfaces.
    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(matches!(
        cache.get("cred").await,
        Err(AuthzError::Authentication)
    ));
    assert_eq!(validator.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_definitive_rejection_is_cached() {
    let validator = ScriptedValidator::new(vec![
        // Missing user object: the credential is ruled out, not retried.
        Ok(json!({ "id": "tok-1", "access": [] })),
        ok_response("tok-1"),
    ]);
    let cache = ValidationCache::new(validator.clone(), config(), None);

    assert!(matches!(
        cache.get("cred").await,
        Err(AuthzError::Authentication)
    ));
    assert!(matches!(
        cache.get("cred").await,
        Err(AuthzError::Authentication)
    ));
    assert_eq!(validator.calls(), 1);

    // After an expiry interval the negative entry is swept and the
    // credential gets another chance.
    tokio::time::advance(Duration::from_secs(101)).await;
    let token = cache.get("cred").await.unwrap();
    assert_eq!(token.id, "tok-1");
    assert_eq!(validator.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_cold_start_validates_once() {
    let validator = ScriptedValidator::new(vec![ok_response("tok-1")]);
    let cache = ValidationCache::new(validator.clone(), config(), None);

    let (a, b) = tokio::join!(cache.get("cred"), cache.get("cred"));
    assert_eq!(a.unwrap().id, "tok-1");
    assert_eq!(b.unwrap().id, "tok-1");
    assert_eq!(validator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_access_response_is_served() {
    let validator = ScriptedValidator::new(vec![Ok(json!({
        "id": "tok-1",
        "access": [],
        "user": { "id": "user-1" }
    }))]);
    let cache = ValidationCache::new(validator.clone(), config(), None);

    let token = cache.get("cred").await.unwrap();
    assert!(token.access.is_empty());
    assert_eq!(token.user_id, "user-1");
}
