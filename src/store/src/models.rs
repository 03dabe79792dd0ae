//! Entity payloads.
//!
//! These are the versioned `data` column of each record; everything else
//! about an entity (history, audit, locking) lives in the envelope.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use sentra_scope::{Scope, ScopeTemplate};

use crate::record::{Entity, EntityKind};

macro_rules! impl_entity {
    ($ty:ty, $kind:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> Uuid {
                self.id
            }

            fn enabled(&self) -> bool {
                self.enabled
            }
        }
    };
}

/// A human principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub id: Uuid,
    pub enabled: bool,
    pub name: String,
}

impl_entity!(UserData, EntityKind::User);

/// A role: scope templates plus the set of member users.
///
/// Roles are how a user's effective access is assembled: the simplified
/// union, across all roles containing the user, of each role's templates
/// after per-request variable injection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleData {
    pub id: Uuid,
    pub enabled: bool,
    pub name: String,
    pub scopes: Vec<ScopeTemplate>,
    pub user_ids: BTreeSet<Uuid>,
}

impl_entity!(RoleData, EntityKind::Role);

impl RoleData {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.user_ids.contains(&user_id)
    }
}

/// An OAuth-style client application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientData {
    pub id: Uuid,
    pub enabled: bool,
    pub name: String,
    pub secrets: BTreeSet<String>,
    pub urls: BTreeSet<String>,
}

impl_entity!(ClientData, EntityKind::Client);

/// A consent linking a client and a user, owning zero or more
/// authorizations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantData {
    pub id: Uuid,
    pub enabled: bool,
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub secrets: BTreeSet<String>,
    pub codes: BTreeSet<String>,
    pub scopes: Vec<Scope>,
}

impl_entity!(GrantData, EntityKind::Grant);

/// A pluggable identity provider (password, email, OpenID, SAML, ...).
/// Strategy-specific configuration lives in `details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityData {
    pub id: Uuid,
    pub enabled: bool,
    pub strategy: String,
    pub name: String,
    pub details: Value,
}

impl_entity!(AuthorityData, EntityKind::Authority);

/// A user's identity under one authority, e.g. an email address or a
/// password hash. `authority_user_id` is the identifier the authority
/// knows the user by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialData {
    pub id: Uuid,
    pub enabled: bool,
    pub authority_id: Uuid,
    pub user_id: Uuid,
    pub authority_user_id: String,
    pub details: Value,
}

impl_entity!(CredentialData, EntityKind::Credential);

/// The bearer credential itself.
///
/// `scopes` is the ceiling of what this credential may ever assert; the
/// user's actual role-derived access narrows it further at evaluation
/// time. The secret is high-entropy and stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationData {
    pub id: Uuid,
    pub enabled: bool,
    pub user_id: Uuid,
    pub grant_id: Option<Uuid>,
    pub secret: String,
    pub scopes: Vec<Scope>,
}

impl_entity!(AuthorizationData, EntityKind::Authorization);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        let role = RoleData {
            id: Uuid::new_v4(),
            enabled: true,
            name: "admins".to_string(),
            scopes: vec!["authx:**:**".parse().unwrap()],
            user_ids: BTreeSet::from([Uuid::new_v4()]),
        };
        let json = serde_json::to_value(&role).unwrap();
        assert_eq!(json["scopes"][0], "authx:**:**");
        let back: RoleData = serde_json::from_value(json).unwrap();
        assert_eq!(back, role);
    }

    #[test]
    fn test_entity_kind_tables() {
        assert_eq!(EntityKind::User.table(), "user");
        assert_eq!(EntityKind::Grant.record_table(), "grant_record");
        assert_eq!(AuthorizationData::KIND, EntityKind::Authorization);
    }
}
