//! Effective access computation.
//!
//! A principal's access is the simplified union, across all enabled
//! roles containing the user, of each role's scope templates injected
//! with the current request's variables, intersected with the
//! authorization's own `scopes` ceiling. The template variables make the
//! result request-scoped, so it is re-derived on every request, never
//! cached.

use std::collections::HashMap;

use sqlx::PgConnection;
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

use sentra_scope::{inject, set_intersection, set_is_superset, simplify, Scope};
use sentra_store::{
    AuthorizationData, Entity, EntityRecord, ReadView, RecordStore, RoleData, UserData,
};

use crate::error::{AuthzError, Result};
use crate::limiter::RateLimiter;

/// Request-scoped template variables.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub current_user_id: Uuid,
    pub current_authorization_id: Uuid,
    pub current_grant_id: Option<Uuid>,
    pub current_client_id: Option<Uuid>,
}

impl TemplateContext {
    /// Derives the context for a request made under `authorization`.
    /// The grant and client, when present, come from the authorization's
    /// grant chain.
    pub fn for_authorization(
        authorization: &AuthorizationData,
        client_id: Option<Uuid>,
    ) -> Self {
        Self {
            current_user_id: authorization.user_id,
            current_authorization_id: authorization.id,
            current_grant_id: authorization.grant_id,
            current_client_id: client_id,
        }
    }

    /// The variable map handed to template injection. Absent variables
    /// are omitted entirely, so templates referencing them are dropped
    /// rather than partially substituted.
    pub fn values(&self) -> HashMap<String, String> {
        let mut values = HashMap::new();
        values.insert(
            "current_user_id".to_string(),
            self.current_user_id.to_string(),
        );
        values.insert(
            "current_authorization_id".to_string(),
            self.current_authorization_id.to_string(),
        );
        if let Some(grant_id) = self.current_grant_id {
            values.insert("current_grant_id".to_string(), grant_id.to_string());
        }
        if let Some(client_id) = self.current_client_id {
            values.insert("current_client_id".to_string(), client_id.to_string());
        }
        values
    }
}

/// Computes effective scope sets and answers permission queries.
pub struct AccessEvaluator {
    limiter: RateLimiter,
}

impl AccessEvaluator {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }

    /// Verifies a presented authorization secret.
    ///
    /// Comparison is constant-time; the secret is high-entropy and
    /// stored as-is. Disabled authorizations never authenticate.
    pub fn verify_secret(
        &self,
        authorization: &EntityRecord<AuthorizationData>,
        presented: &str,
    ) -> Result<()> {
        self.limiter.limit(&authorization.entity_id.to_string())?;
        let expected = authorization.data.secret.as_bytes();
        let presented = presented.as_bytes();
        let matches =
            expected.len() == presented.len() && expected.ct_eq(presented).unwrap_u8() == 1;
        if !matches || !authorization.data.enabled {
            debug!(
                authorization_id = %authorization.entity_id,
                enabled = authorization.data.enabled,
                "authorization secret verification failed"
            );
            return Err(AuthzError::Authentication);
        }
        Ok(())
    }

    /// The authorization's effective scope set under `ctx`.
    ///
    /// Disabled authorizations and disabled users have no access at all;
    /// enablement is an independent gate, not a scope.
    pub async fn access(
        &self,
        conn: &mut PgConnection,
        authorization: &EntityRecord<AuthorizationData>,
        ctx: &TemplateContext,
    ) -> Result<Vec<Scope>> {
        self.limiter.limit(&authorization.entity_id.to_string())?;
        if !authorization.data.enabled {
            return Ok(Vec::new());
        }
        let user = RecordStore::read::<UserData>(
            conn,
            authorization.data.user_id,
            ReadView::Current,
        )
        .await?;
        if !user.data.enabled {
            return Ok(Vec::new());
        }

        let values = ctx.values();
        let mut granted = Vec::new();
        for role in RecordStore::list_current::<RoleData>(conn).await? {
            if role.data.enabled && role.data.has_member(user.entity_id) {
                granted.extend(inject(&role.data.scopes, &values)?);
            }
        }
        let user_access = simplify(&granted);

        Ok(set_intersection(&authorization.data.scopes, &user_access))
    }

    /// Whether the authorization's effective access covers every
    /// required scope.
    pub async fn can(
        &self,
        conn: &mut PgConnection,
        authorization: &EntityRecord<AuthorizationData>,
        ctx: &TemplateContext,
        required: &[Scope],
    ) -> Result<bool> {
        let access = self.access(conn, authorization, ctx).await?;
        Ok(set_is_superset(&access, required))
    }

    /// Whether `entity` is accessible to the acting authorization for
    /// `action`, i.e. whether the actor's effective access covers
    /// `realm:<kind>.<entity_id>:<action>`.
    ///
    /// A disabled entity is inaccessible regardless of scope match.
    pub async fn is_accessible_by<T: Entity>(
        &self,
        conn: &mut PgConnection,
        realm: &str,
        entity: &EntityRecord<T>,
        authorization: &EntityRecord<AuthorizationData>,
        ctx: &TemplateContext,
        action: &str,
    ) -> Result<bool> {
        if !entity.data.enabled() {
            return Ok(false);
        }
        let required = Scope::parse(&format!(
            "{realm}:{}.{}:{action}",
            T::KIND,
            entity.entity_id
        ))?;
        self.can(conn, authorization, ctx, std::slice::from_ref(&required))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn authorization(enabled: bool, secret: &str) -> EntityRecord<AuthorizationData> {
        let id = Uuid::new_v4();
        EntityRecord {
            record_id: Uuid::new_v4(),
            entity_id: id,
            data: AuthorizationData {
                id,
                enabled,
                user_id: Uuid::new_v4(),
                grant_id: None,
                secret: secret.to_string(),
                scopes: Vec::new(),
            },
            replacement_record_id: None,
            created_at: Utc::now(),
            created_by_authorization_id: Uuid::new_v4(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_verify_secret() {
        let evaluator = AccessEvaluator::new(RateLimiter::disabled());
        let auth = authorization(true, "s3cret-of-high-entropy");

        evaluator
            .verify_secret(&auth, "s3cret-of-high-entropy")
            .unwrap();
        assert!(matches!(
            evaluator.verify_secret(&auth, "wrong"),
            Err(AuthzError::Authentication)
        ));
        assert!(matches!(
            evaluator.verify_secret(&auth, "s3cret-of-high-entropy-x"),
            Err(AuthzError::Authentication)
        ));
    }

    #[test]
    fn test_verify_secret_disabled_authorization() {
        let evaluator = AccessEvaluator::new(RateLimiter::disabled());
        let auth = authorization(false, "s3cret");
        assert!(matches!(
            evaluator.verify_secret(&auth, "s3cret"),
            Err(AuthzError::Authentication)
        ));
    }

    #[test]
    fn test_template_context_values() {
        let ctx = TemplateContext {
            current_user_id: Uuid::new_v4(),
            current_authorization_id: Uuid::new_v4(),
            current_grant_id: None,
            current_client_id: None,
        };
        let values = ctx.values();
        assert_eq!(
            values["current_user_id"],
            ctx.current_user_id.to_string()
        );
        assert!(!values.contains_key("current_grant_id"));
        assert!(!values.contains_key("current_client_id"));
    }
}
