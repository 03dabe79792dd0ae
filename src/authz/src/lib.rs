//! # Sentra authorization core
//!
//! Decides, for a given bearer credential, which actions on which
//! resources are permitted, and lets downstream resource servers verify
//! and cache that decision locally.
//!
//! - [`AccessEvaluator`] computes a principal's effective scope set by
//!   expanding role membership and per-request template variables, and
//!   answers "is this action permitted" queries.
//! - [`token`] verifies self-contained signed tokens against rotating
//!   public keys and caches remotely-validated opaque credentials with
//!   stale-while-revalidate semantics.
//! - [`RateLimiter`] bounds abuse at the evaluation and
//!   credential-verification entry points.

pub mod access;
pub mod error;
pub mod limiter;
pub mod strategy;
pub mod token;

pub use access::{AccessEvaluator, TemplateContext};
pub use error::{AuthzError, Result};
pub use limiter::{RateLimiter, RateLimiterConfig};
pub use strategy::{AuthorityStrategy, StrategyRegistry};
pub use token::{
    BearerConfig, BearerVerifier, CacheConfig, RemoteValidator, RequestFlow, TokenDecision,
    TransportError, ValidatedToken, ValidationCache,
};
