use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use sentra_scope::Scope;

use crate::error::{AuthzError, Result};

/// Failure reaching the central validation endpoint. Distinct from a
/// rejection: the answer is unknown, not negative.
#[derive(Debug, Clone, thiserror::Error)]
#[error("credential validation transport failure: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Calls the central server to validate an opaque credential.
#[async_trait]
pub trait RemoteValidator: Send + Sync + 'static {
    async fn validate(
        &self,
        credential: &str,
    ) -> std::result::Result<Value, TransportError>;
}

/// A credential the central server vouched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    pub id: String,
    pub access: Vec<Scope>,
    pub user_id: String,
}

/// Extracts a token from a validation response. `None` means the
/// response shape rules the credential out for good, not that the call
/// failed. An empty access list is a valid, fully narrowed grant.
fn parse_response(value: &Value) -> Option<ValidatedToken> {
    let id = value.get("id")?.as_str()?.to_string();
    let user_id = value.get("user")?.get("id")?.as_str()?.to_string();
    let raw_access = value.get("access")?.as_array()?;
    let mut access = Vec::with_capacity(raw_access.len());
    for raw in raw_access {
        access.push(raw.as_str()?.parse::<Scope>().ok()?);
    }
    Some(ValidatedToken {
        id,
        access,
        user_id,
    })
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Revalidate a served token in the background once it is older
    /// than this.
    pub token_refresh: Duration,
    /// Stop serving a token this long after its last successful
    /// validation, refreshes failing in between notwithstanding.
    pub token_expiry: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            token_refresh: Duration::from_secs(30),
            token_expiry: Duration::from_secs(60),
        }
    }
}

enum EntryState {
    /// First validation in flight; nothing to serve yet.
    Pending,
    Valid(ValidatedToken),
    /// The server definitively rejected the credential.
    Invalid,
}

struct CacheEntry {
    state: EntryState,
    refreshing: bool,
    /// Set when a background refresh hit a transport failure, so the
    /// next request retries immediately instead of waiting out the
    /// refresh interval.
    force_refresh: bool,
    last_refresh_request: Instant,
    last_success: Option<Instant>,
}

struct CacheInner {
    entries: DashMap<String, CacheEntry>,
    validator: Arc<dyn RemoteValidator>,
    config: CacheConfig,
    observer: Option<mpsc::UnboundedSender<TransportError>>,
}

/// Stale-while-revalidate cache in front of a [`RemoteValidator`].
///
/// A hit on a fresh entry is answered locally. Once an entry is older
/// than `token_refresh` it is still served, with a single background
/// revalidation in flight. Past `token_expiry` since the last success
/// the entry is dropped and the next request validates inline again.
#[derive(Clone)]
pub struct ValidationCache {
    inner: Arc<CacheInner>,
}

enum Action {
    Fetch,
    Wait,
    Serve(ValidatedToken),
    Deny,
}

impl ValidationCache {
    pub fn new(
        validator: Arc<dyn RemoteValidator>,
        config: CacheConfig,
        observer: Option<mpsc::UnboundedSender<TransportError>>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                validator,
                config,
                observer,
            }),
        }
    }

    /// Validates a credential, serving from the cache when possible.
    pub async fn get(&self, credential: &str) -> Result<ValidatedToken> {
        let now = Instant::now();
        let expiry = self.inner.config.token_expiry;
        self.inner.entries.retain(|_, entry| match entry.last_success {
            None => true,
            Some(at) => now.duration_since(at) < expiry,
        });

        let action = match self.inner.entries.entry(credential.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(CacheEntry {
                    state: EntryState::Pending,
                    refreshing: true,
                    force_refresh: false,
                    last_refresh_request: now,
                    last_success: None,
                });
                Action::Fetch
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                match &entry.state {
                    EntryState::Pending => Action::Wait,
                    EntryState::Invalid => Action::Deny,
                    EntryState::Valid(token) => {
                        let due = entry.force_refresh
                            || now.duration_since(entry.last_refresh_request)
                                >= self.inner.config.token_refresh;
                        if due && !entry.refreshing {
                            entry.refreshing = true;
                            entry.force_refresh = false;
                            entry.last_refresh_request = now;
                            let cache = self.clone();
                            let credential = credential.to_string();
                            tokio::spawn(async move {
                                let _ = cache.fetch(&credential).await;
                            });
                        }
                        Action::Serve(token.clone())
                    }
                }
            }
        };

        match action {
            Action::Serve(token) => Ok(token),
            Action::Deny => Err(AuthzError::Authentication),
            Action::Fetch => self.fetch(credential).await,
            Action::Wait => self.wait(credential).await,
        }
    }

    /// Polls until the validation another caller started settles.
    async fn wait(&self, credential: &str) -> Result<ValidatedToken> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            {
                match self.inner.entries.get(credential) {
                    None => return Err(AuthzError::Authentication),
                    Some(entry) => match &entry.state {
                        EntryState::Pending => {}
                        EntryState::Invalid => return Err(AuthzError::Authentication),
                        EntryState::Valid(token) => return Ok(token.clone()),
                    },
                }
            }
            if Instant::now() > deadline {
                warn!("timed out waiting on an in-flight credential validation");
                return Err(AuthzError::Authentication);
            }
        }
    }

    /// Calls the validator and writes the outcome back. No map guard is
    /// held across the call.
    async fn fetch(&self, credential: &str) -> Result<ValidatedToken> {
        let outcome = self.inner.validator.validate(credential).await;
        let now = Instant::now();
        match outcome {
            Ok(value) => match parse_response(&value) {
                Some(token) => {
                    self.inner.entries.insert(
                        credential.to_string(),
                        CacheEntry {
                            state: EntryState::Valid(token.clone()),
                            refreshing: false,
                            force_refresh: false,
                            last_refresh_request: now,
                            last_success: Some(now),
                        },
                    );
                    Ok(token)
                }
                None => {
                    debug!("credential definitively rejected by validation response");
                    // last_success is set so the sweep retires the
                    // negative entry after an expiry interval and the
                    // credential gets re-checked.
                    self.inner.entries.insert(
                        credential.to_string(),
                        CacheEntry {
                            state: EntryState::Invalid,
                            refreshing: false,
                            force_refresh: false,
                            last_refresh_request: now,
                            last_success: Some(now),
                        },
                    );
                    Err(AuthzError::Authentication)
                }
            },
            Err(transport) => {
                warn!(error = %transport, "credential validation transport failure");
                if let Some(observer) = &self.inner.observer {
                    let _ = observer.send(transport);
                }
                let drop_entry = match self.inner.entries.get_mut(credential) {
                    None => false,
                    Some(mut entry) => match entry.state {
                        EntryState::Valid(_) => {
                            entry.refreshing = false;
                            entry.force_refresh = true;
                            false
                        }
                        EntryState::Pending | EntryState::Invalid => true,
                    },
                };
                if drop_entry {
                    self.inner.entries.remove(credential);
                }
                Err(AuthzError::Authentication)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_response_full() {
        let value = json!({
            "id": "tok-1",
            "access": ["authx:user.abc:r", "authx:grant.*:**"],
            "user": { "id": "user-1" }
        });
        let token = parse_response(&value).unwrap();
        assert_eq!(token.id, "tok-1");
        assert_eq!(token.user_id, "user-1");
        assert_eq!(token.access.len(), 2);
    }

    #[test]
    fn test_parse_response_empty_access_is_valid() {
        let value = json!({
            "id": "tok-1",
            "access": [],
            "user": { "id": "user-1" }
        });
        let token = parse_response(&value).unwrap();
        assert!(token.access.is_empty());
    }

    #[test]
    fn test_parse_response_rejects_missing_fields() {
        assert!(parse_response(&json!({ "access": [], "user": { "id": "u" } })).is_none());
        assert!(parse_response(&json!({ "id": "t", "user": { "id": "u" } })).is_none());
        assert!(parse_response(&json!({ "id": "t", "access": [] })).is_none());
        assert!(parse_response(&json!({
            "id": "t",
            "access": ["not a scope"],
            "user": { "id": "u" }
        }))
        .is_none());
    }
}
