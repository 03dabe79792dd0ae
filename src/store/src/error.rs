//! Error types for the record store.

use thiserror::Error;
use uuid::Uuid;

use crate::record::EntityKind;

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity does not exist, or has no current version.
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    /// A create collided with an existing primary key.
    #[error("{kind} {id} already exists")]
    Conflict { kind: EntityKind, id: Uuid },

    /// The caller supplied malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A data-integrity assumption was violated; fatal to the operation.
    #[error("integrity violation: {0}")]
    Invariant(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The jsonb payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Translates a duplicate-primary-key database error into [`StoreError::Conflict`];
/// every other database error propagates as-is.
pub(crate) fn map_insert_error(e: sqlx::Error, kind: EntityKind, id: Uuid) -> StoreError {
    if let Some(db) = e.as_database_error() {
        // Postgres unique_violation
        if db.code().as_deref() == Some("23505") {
            return StoreError::Conflict { kind, id };
        }
    }
    StoreError::Database(e)
}
