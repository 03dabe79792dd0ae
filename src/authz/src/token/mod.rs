//! Edge-side credential validation.
//!
//! Resource servers guard requests with either self-contained signed
//! bearer tokens, verified locally against a rotating key list
//! ([`BearerVerifier`]), or opaque credentials validated against the
//! central server through a stale-while-revalidate cache
//! ([`ValidationCache`]).

mod cache;
mod verifier;

pub use cache::{
    CacheConfig, RemoteValidator, TransportError, ValidatedToken, ValidationCache,
};
pub use verifier::{decide, BearerConfig, BearerVerifier, RequestFlow, TokenDecision};
