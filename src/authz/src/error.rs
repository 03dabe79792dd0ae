//! Error types for the authorization core.

use thiserror::Error;

use sentra_scope::ScopeError;
use sentra_store::StoreError;

/// Authorization errors.
///
/// Authentication failures are deliberately generic in their user-visible
/// message so responses cannot be used as an oracle for which identifiers
/// exist; internal logs carry the detail.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed input, the caller's fault.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The entity or credential does not exist or is not current.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authenticated, but insufficient scope or a disabled entity.
    #[error("forbidden")]
    Forbidden,

    /// Credential absent, invalid or expired.
    #[error("authentication failed")]
    Authentication,

    /// A create collided with an existing entity.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rate limit exceeded.
    #[error("too many requests")]
    TooManyRequests,

    /// A data-integrity assumption was violated; fatal to the current
    /// operation, never silently recovered.
    #[error("integrity violation: {0}")]
    Invariant(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),
}

impl From<ScopeError> for AuthzError {
    fn from(e: ScopeError) -> Self {
        AuthzError::Validation(e.to_string())
    }
}

impl From<StoreError> for AuthzError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => AuthzError::NotFound(e.to_string()),
            StoreError::Conflict { .. } => AuthzError::Conflict(e.to_string()),
            StoreError::Validation(msg) => AuthzError::Validation(msg),
            StoreError::Invariant(msg) => AuthzError::Invariant(msg),
            StoreError::Database(_) | StoreError::Codec(_) => AuthzError::Database(e.to_string()),
        }
    }
}

/// Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;
