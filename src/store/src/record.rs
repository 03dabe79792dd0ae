//! The immutable record envelope and the entity kinds it wraps.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The persisted entity kinds.
///
/// The variant order is irrelevant; lock acquisition sorts by
/// [`EntityKind::table`] to establish the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Authority,
    Authorization,
    Client,
    Credential,
    Grant,
    Role,
    User,
}

impl EntityKind {
    /// The identity table name. Quoted in generated SQL: several of
    /// these ("user", "grant", "authorization") are reserved words.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Authority => "authority",
            EntityKind::Authorization => "authorization",
            EntityKind::Client => "client",
            EntityKind::Credential => "credential",
            EntityKind::Grant => "grant",
            EntityKind::Role => "role",
            EntityKind::User => "user",
        }
    }

    /// The record table name.
    pub fn record_table(&self) -> String {
        format!("{}_record", self.table())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A versioned entity payload.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    /// The kind this payload persists under.
    const KIND: EntityKind;

    /// Stable identity, shared across all versions.
    fn id(&self) -> Uuid;

    /// Disabled entities are filtered by access evaluation, not by the
    /// store; the store persists them like any other version.
    fn enabled(&self) -> bool;
}

/// Audit metadata attached to every write.
#[derive(Debug, Clone, Copy)]
pub struct WriteMeta {
    /// Which credential performed the write.
    pub created_by_authorization_id: Uuid,
}

/// One immutable version of a persisted entity.
///
/// `replacement_record_id` is `None` while this is the current version;
/// once superseded it points at the record that replaced it, so the chain
/// of records forms the append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord<T> {
    pub record_id: Uuid,
    pub entity_id: Uuid,
    pub data: T,
    pub replacement_record_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub created_by_authorization_id: Uuid,
    /// Set on the terminal record written by an explicit delete.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl<T> EntityRecord<T> {
    /// Whether this record is the current version of its entity.
    pub fn is_current(&self) -> bool {
        self.replacement_record_id.is_none()
    }

    /// Whether this record marks its entity as deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
