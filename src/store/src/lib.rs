//! # Sentra record store
//!
//! Generic versioned CRUD over entities with row-level locking and an
//! append-only history. Every entity kind is persisted as two tables: an
//! identity table (`id` only, the foreign-key anchor and the row that
//! gets locked) and a `<kind>_record` table holding one immutable row per
//! version. The current version is the single record whose
//! `replacement_record_id` is NULL; superseding it is the only mutation
//! the store ever performs.

pub mod error;
pub mod models;
pub mod record;
pub mod store;

pub use error::{Result, StoreError};
pub use models::{
    AuthorityData, AuthorizationData, ClientData, CredentialData, GrantData, RoleData, UserData,
};
pub use record::{Entity, EntityKind, EntityRecord, WriteMeta};
pub use store::{ReadView, RecordStore, TxContext};
