//! Scope type definitions and validation.
//!
//! A scope has exactly three domains (realm, context, action). A whole
//! domain may be the empty string (the "no selector" convention), which
//! grants nothing in that domain; an empty segment inside a dotted list
//! is malformed and rejected.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for scope operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Errors raised when parsing or manipulating scopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// The string does not have exactly three colon-separated domains.
    #[error("scope must have exactly three domains (realm:context:action), got {0}")]
    DomainCount(usize),
    /// A dotted segment list contains an empty segment.
    #[error("scope segment cannot be empty")]
    EmptySegment,
    /// `*` or `**` combined with other characters, or `**` not trailing.
    #[error("invalid wildcard usage: {0}")]
    InvalidWildcard(String),
    /// A segment contains a reserved character.
    #[error("invalid segment {0:?}")]
    InvalidSegment(String),
    /// A template variable appeared where a concrete scope was required.
    #[error("template variable {{{0}}} is not valid in a concrete scope")]
    UnexpectedVariable(String),
    /// A malformed template variable (`{` / `}` misuse).
    #[error("invalid template variable: {0}")]
    InvalidVariable(String),
}

/// One segment of a scope domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A literal token.
    Literal(String),
    /// `*`: matches exactly one arbitrary segment.
    Any,
    /// `**`: matches zero or more trailing segments; last in its domain.
    AnySuffix,
    /// `{name}`: a named template variable (templates only).
    Variable(String),
}

impl Segment {
    fn parse(raw: &str, allow_variables: bool) -> ScopeResult<Self> {
        if raw.is_empty() {
            return Err(ScopeError::EmptySegment);
        }
        match raw {
            "*" => return Ok(Segment::Any),
            "**" => return Ok(Segment::AnySuffix),
            _ => {}
        }
        if raw.starts_with('{') || raw.ends_with('}') {
            let name = raw
                .strip_prefix('{')
                .and_then(|r| r.strip_suffix('}'))
                .ok_or_else(|| ScopeError::InvalidVariable(raw.to_string()))?;
            if name.is_empty() || !name.chars().all(valid_literal_char) {
                return Err(ScopeError::InvalidVariable(raw.to_string()));
            }
            if !allow_variables {
                return Err(ScopeError::UnexpectedVariable(name.to_string()));
            }
            return Ok(Segment::Variable(name.to_string()));
        }
        if raw.contains('*') {
            return Err(ScopeError::InvalidWildcard(format!(
                "wildcards must be standalone segments: {raw:?}"
            )));
        }
        if !raw.chars().all(valid_literal_char) {
            return Err(ScopeError::InvalidSegment(raw.to_string()));
        }
        Ok(Segment::Literal(raw.to_string()))
    }
}

fn valid_literal_char(c: char) -> bool {
    !matches!(c, ':' | '.' | '*' | '{' | '}') && !c.is_whitespace()
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(s) => f.write_str(s),
            Segment::Any => f.write_str("*"),
            Segment::AnySuffix => f.write_str("**"),
            Segment::Variable(name) => write!(f, "{{{name}}}"),
        }
    }
}

/// One domain: a possibly empty list of segments.
pub type Domain = Vec<Segment>;

fn parse_domain(raw: &str, allow_variables: bool) -> ScopeResult<Domain> {
    // "" is the "no selector" domain: zero segments, grants nothing.
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<Segment> = raw
        .split('.')
        .map(|s| Segment::parse(s, allow_variables))
        .collect::<ScopeResult<_>>()?;
    if let Some(pos) = segments.iter().position(|s| *s == Segment::AnySuffix) {
        if pos != segments.len() - 1 {
            return Err(ScopeError::InvalidWildcard(
                "'**' may only appear as the last segment of a domain".to_string(),
            ));
        }
    }
    Ok(segments)
}

fn parse_domains(s: &str, allow_variables: bool) -> ScopeResult<[Domain; 3]> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return Err(ScopeError::DomainCount(parts.len()));
    }
    Ok([
        parse_domain(parts[0], allow_variables)?,
        parse_domain(parts[1], allow_variables)?,
        parse_domain(parts[2], allow_variables)?,
    ])
}

fn format_domains(domains: &[Domain; 3], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, domain) in domains.iter().enumerate() {
        if i > 0 {
            f.write_str(":")?;
        }
        for (j, segment) in domain.iter().enumerate() {
            if j > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
    }
    Ok(())
}

/// A concrete scope: three domains, no template variables.
///
/// Parsed with [`Scope::parse`] or [`FromStr`]; serialized as its string
/// form (the format persisted in `scopes` columns and carried in signed
/// tokens).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope {
    domains: [Domain; 3],
}

impl Scope {
    /// Parses a concrete scope, rejecting template variables.
    pub fn parse(s: &str) -> ScopeResult<Self> {
        Ok(Self {
            domains: parse_domains(s, false)?,
        })
    }

    /// The realm, context and action domains.
    pub fn domains(&self) -> &[Domain; 3] {
        &self.domains
    }

    /// Builds a scope from already-validated domains.
    ///
    /// Used by the set operations; not exposed outside the crate so the
    /// no-variables invariant cannot be broken.
    pub(crate) fn from_domains(domains: [Domain; 3]) -> Self {
        Self { domains }
    }

    /// Whether any domain contains `*` or `**`.
    pub fn has_wildcards(&self) -> bool {
        self.domains
            .iter()
            .flatten()
            .any(|s| matches!(s, Segment::Any | Segment::AnySuffix))
    }
}

impl FromStr for Scope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> String {
        scope.to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_domains(&self.domains, f)
    }
}

/// A scope template: like [`Scope`] but `{name}` variables are allowed.
///
/// Templates are plain data (this is how roles store their grants);
/// substitution happens per request via [`crate::inject`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeTemplate {
    domains: [Domain; 3],
}

impl ScopeTemplate {
    /// Parses a template; variables are permitted but not required.
    pub fn parse(s: &str) -> ScopeResult<Self> {
        Ok(Self {
            domains: parse_domains(s, true)?,
        })
    }

    /// The realm, context and action domains.
    pub fn domains(&self) -> &[Domain; 3] {
        &self.domains
    }

    /// Substitutes every variable, or returns `None` if any referenced
    /// variable is absent from `values`. Never partially substitutes.
    pub fn substitute(&self, values: &HashMap<String, String>) -> ScopeResult<Option<Scope>> {
        let mut domains: [Domain; 3] = Default::default();
        for (out, domain) in domains.iter_mut().zip(self.domains.iter()) {
            for segment in domain {
                match segment {
                    Segment::Variable(name) => match values.get(name) {
                        Some(value) => {
                            let substituted = Segment::parse(value, false)?;
                            if !matches!(substituted, Segment::Literal(_)) {
                                return Err(ScopeError::InvalidSegment(value.clone()));
                            }
                            out.push(substituted);
                        }
                        None => return Ok(None),
                    },
                    other => out.push(other.clone()),
                }
            }
        }
        Ok(Some(Scope { domains }))
    }
}

impl FromStr for ScopeTemplate {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ScopeTemplate {
    type Error = ScopeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ScopeTemplate> for String {
    fn from(template: ScopeTemplate) -> String {
        template.to_string()
    }
}

impl From<Scope> for ScopeTemplate {
    fn from(scope: Scope) -> Self {
        Self {
            domains: scope.domains,
        }
    }
}

impl fmt::Display for ScopeTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_domains(&self.domains, f)
    }
}
