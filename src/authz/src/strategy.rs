//! Pluggable credential-verifier strategies.
//!
//! Each identity provider (password, email, OpenID, SAML, ...) is a
//! strategy registered against the name stored on its authorities. The
//! core only depends on this interface; concrete strategies live with
//! the server that wires them up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgConnection;

use sentra_store::{
    AuthorityData, CredentialData, EntityRecord, ReadView, RecordStore,
};

use crate::error::{AuthzError, Result};

/// A credential-verifier plugin.
#[async_trait]
pub trait AuthorityStrategy: Send + Sync {
    /// The strategy name authorities reference, e.g. `"password"`.
    fn name(&self) -> &'static str;

    /// Resolves the credential this authority holds for an identifier,
    /// or `None` when the identifier is unknown.
    async fn credential(
        &self,
        conn: &mut PgConnection,
        authority: &EntityRecord<AuthorityData>,
        authority_user_id: &str,
    ) -> Result<Option<EntityRecord<CredentialData>>>;

    /// Resolves the authority owning a credential.
    async fn authority(
        &self,
        conn: &mut PgConnection,
        credential: &EntityRecord<CredentialData>,
    ) -> Result<EntityRecord<AuthorityData>> {
        Ok(RecordStore::read::<AuthorityData>(
            conn,
            credential.data.authority_id,
            ReadView::Current,
        )
        .await?)
    }
}

/// Looks up the single enabled current credential for an (authority,
/// identifier) pair.
///
/// More than one enabled credential for the same pair indicates a
/// deeper bug and fails the operation rather than picking one.
pub async fn find_enabled_credential(
    conn: &mut PgConnection,
    authority: &EntityRecord<AuthorityData>,
    authority_user_id: &str,
) -> Result<Option<EntityRecord<CredentialData>>> {
    let mut credentials: Vec<EntityRecord<CredentialData>> =
        RecordStore::current_credentials_for(conn, authority.entity_id, authority_user_id)
            .await?
            .into_iter()
            .filter(|c| c.data.enabled)
            .collect();
    if credentials.len() > 1 {
        return Err(AuthzError::Invariant(format!(
            "authority {} has {} enabled credentials for the same identifier",
            authority.entity_id,
            credentials.len()
        )));
    }
    Ok(credentials.pop())
}

/// Registry of strategies, keyed by name.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn AuthorityStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a strategy, replacing any previous one of the same name.
    pub fn register(&mut self, strategy: Arc<dyn AuthorityStrategy>) {
        self.strategies.insert(strategy.name(), strategy);
    }

    /// The strategy for a given name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn AuthorityStrategy>> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| AuthzError::Validation(format!("unknown authority strategy {name:?}")))
    }

    /// The strategy an authority is configured with.
    pub fn for_authority(
        &self,
        authority: &EntityRecord<AuthorityData>,
    ) -> Result<Arc<dyn AuthorityStrategy>> {
        self.get(&authority.data.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullStrategy;

    #[async_trait]
    impl AuthorityStrategy for NullStrategy {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn credential(
            &self,
            _conn: &mut PgConnection,
            _authority: &EntityRecord<AuthorityData>,
            _authority_user_id: &str,
        ) -> Result<Option<EntityRecord<CredentialData>>> {
            Ok(None)
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(NullStrategy));

        assert_eq!(registry.get("null").unwrap().name(), "null");
        assert!(matches!(
            registry.get("saml"),
            Err(AuthzError::Validation(_))
        ));
    }
}
