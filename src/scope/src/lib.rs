//! # Sentra scope language
//!
//! Scopes express capabilities as `realm:context:action`: exactly three
//! colon-separated domains, each a dot-separated list of segments.
//! Segments are literals, `*` (exactly one arbitrary segment), `**` (any
//! trailing remainder, including empty), or `{name}` template variables
//! (templates only).
//!
//! Everything in this crate is a pure function over parsed scopes: no
//! I/O, no shared state, safe to call concurrently from any thread.
//!
//! ## Example
//!
//! ```
//! use sentra_scope::{Scope, is_superset, simplify};
//!
//! let pattern: Scope = "authx:user.**:r".parse().unwrap();
//! let scope: Scope = "authx:user.abc.profile:r".parse().unwrap();
//! assert!(is_superset(&pattern, &scope));
//!
//! let set = simplify(&[pattern.clone(), scope]);
//! assert_eq!(set, vec![pattern]);
//! ```

pub mod ops;
pub mod types;

pub use ops::{
    compact, inject, intersect, is_superset, set_intersection, set_is_superset, simplify,
};
pub use types::{Scope, ScopeError, ScopeResult, ScopeTemplate, Segment};
