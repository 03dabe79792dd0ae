//! Set operations over scopes.
//!
//! Scopes are compared as sets of granted capabilities, never as strings:
//! `**` may expand to zero segments and `*` must not cross a domain
//! boundary, so substring or prefix comparisons are incorrect.

use std::collections::HashMap;

use crate::types::{Scope, ScopeResult, ScopeTemplate, Segment};

/// Returns true iff every concrete permission matched by `scope` is also
/// matched by `pattern`.
///
/// Both sides may carry wildcards. `is_superset(a, a)` always holds.
pub fn is_superset(pattern: &Scope, scope: &Scope) -> bool {
    pattern
        .domains()
        .iter()
        .zip(scope.domains().iter())
        .all(|(a, b)| domain_covers(a, b))
}

/// Returns true iff every scope in `scopes` is covered by some pattern in
/// `patterns`.
pub fn set_is_superset(patterns: &[Scope], scopes: &[Scope]) -> bool {
    scopes
        .iter()
        .all(|s| patterns.iter().any(|p| is_superset(p, s)))
}

fn domain_covers(a: &[Segment], b: &[Segment]) -> bool {
    match (a.first(), b.first()) {
        // `**` is validated to be trailing, so it absorbs the whole
        // remainder of `b`, including an empty one.
        (Some(Segment::AnySuffix), _) => true,
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        // `b` matches unbounded suffixes; a bounded `a` cannot cover it.
        (Some(_), Some(Segment::AnySuffix)) => false,
        (Some(Segment::Any), Some(_)) => domain_covers(&a[1..], &b[1..]),
        (Some(Segment::Literal(x)), Some(Segment::Literal(y))) => {
            x == y && domain_covers(&a[1..], &b[1..])
        }
        // A literal cannot cover `*`, which also matches other literals.
        (Some(Segment::Literal(_)), Some(Segment::Any)) => false,
        // Variables never reach concrete scopes.
        (Some(Segment::Variable(_)), _) | (_, Some(Segment::Variable(_))) => false,
    }
}

/// Returns the minimal set covering exactly the same capabilities:
/// duplicates and scopes already covered by another member are removed.
///
/// The output is canonically sorted, so the function is idempotent and
/// order-independent.
pub fn simplify(scopes: &[Scope]) -> Vec<Scope> {
    let mut set: Vec<Scope> = scopes.to_vec();
    set.sort_by_key(|s| s.to_string());
    set.dedup();

    set.iter()
        .enumerate()
        .filter(|(i, s)| {
            !set.iter().enumerate().any(|(j, t)| {
                // Drop `s` when a distinct `t` covers it; if the two
                // cover each other, keep only the earlier one.
                j != *i && is_superset(t, s) && (!is_superset(s, t) || j < *i)
            })
        })
        .map(|(_, s)| s.clone())
        .collect()
}

/// Substitutes template variables, dropping any template that references
/// an unavailable variable. Never partially substitutes.
pub fn inject(
    templates: &[ScopeTemplate],
    values: &HashMap<String, String>,
) -> ScopeResult<Vec<Scope>> {
    let mut scopes = Vec::with_capacity(templates.len());
    for template in templates {
        if let Some(scope) = template.substitute(values)? {
            scopes.push(scope);
        }
    }
    Ok(scopes)
}

/// Returns the scope matching exactly the capabilities granted by both
/// `a` and `b`, or `None` when they share none.
pub fn intersect(a: &Scope, b: &Scope) -> Option<Scope> {
    let mut domains: [Vec<Segment>; 3] = Default::default();
    for (out, (da, db)) in domains
        .iter_mut()
        .zip(a.domains().iter().zip(b.domains().iter()))
    {
        *out = domain_intersect(da, db)?;
    }
    Some(Scope::from_domains(domains))
}

fn domain_intersect(a: &[Segment], b: &[Segment]) -> Option<Vec<Segment>> {
    match (a.first(), b.first()) {
        // `**` contributes no constraint; the other side is the answer.
        (Some(Segment::AnySuffix), _) => Some(b.to_vec()),
        (_, Some(Segment::AnySuffix)) => Some(a.to_vec()),
        (None, None) => Some(Vec::new()),
        (None, Some(_)) | (Some(_), None) => None,
        (Some(x), Some(y)) => {
            let head = match (x, y) {
                (Segment::Any, other) | (other, Segment::Any) => other.clone(),
                (Segment::Literal(x), Segment::Literal(y)) if x == y => Segment::Literal(x.clone()),
                _ => return None,
            };
            let mut rest = domain_intersect(&a[1..], &b[1..])?;
            rest.insert(0, head);
            Some(rest)
        }
    }
}

/// Simplified pairwise intersection of two scope sets. This is how an
/// authorization's `scopes` ceiling narrows the user's role-derived
/// access.
pub fn set_intersection(a: &[Scope], b: &[Scope]) -> Vec<Scope> {
    let mut out = Vec::new();
    for x in a {
        for y in b {
            if let Some(both) = intersect(x, y) {
                out.push(both);
            }
        }
    }
    simplify(&out)
}

/// Scope-set compaction for administration surfaces.
///
/// Given the exhaustive list of per-action scopes (`all`) and the subset
/// currently granted, greedily replaces trailing literal runs with `**`
/// wherever doing so would not newly grant any scope in `all` outside the
/// granted set's coverage. The first (most general) safe generalization
/// per scope wins; unsafe scopes are kept as-is.
pub fn compact(granted: &[Scope], all: &[Scope]) -> Vec<Scope> {
    let compacted: Vec<Scope> = granted
        .iter()
        .map(|scope| generalize(scope, granted, all).unwrap_or_else(|| scope.clone()))
        .collect();
    simplify(&compacted)
}

fn generalize(scope: &Scope, granted: &[Scope], all: &[Scope]) -> Option<Scope> {
    for (domain_index, segment_index) in candidate_cuts(scope) {
        let candidate = cut(scope, domain_index, segment_index);
        let safe = all
            .iter()
            .filter(|x| is_superset(&candidate, x))
            .all(|x| set_is_superset(granted, std::slice::from_ref(x)));
        if safe {
            return Some(candidate);
        }
    }
    None
}

/// Cut points in generality order: earlier domains first, then earlier
/// segments. Only trailing runs made entirely of literals are eligible.
fn candidate_cuts(scope: &Scope) -> Vec<(usize, usize)> {
    let mut cuts = Vec::new();
    for domain_index in 0..3 {
        let tail_is_literal = |from: usize| {
            scope.domains()[domain_index][from..]
                .iter()
                .all(|s| matches!(s, Segment::Literal(_)))
                && scope.domains()[domain_index + 1..]
                    .iter()
                    .flatten()
                    .all(|s| matches!(s, Segment::Literal(_)))
        };
        for segment_index in 0..scope.domains()[domain_index].len() {
            if tail_is_literal(segment_index) {
                cuts.push((domain_index, segment_index));
            }
        }
    }
    cuts
}

fn cut(scope: &Scope, domain_index: usize, segment_index: usize) -> Scope {
    let mut domains: [Vec<Segment>; 3] = scope.domains().clone();
    domains[domain_index].truncate(segment_index);
    domains[domain_index].push(Segment::AnySuffix);
    for domain in domains.iter_mut().skip(domain_index + 1) {
        *domain = vec![Segment::AnySuffix];
    }
    Scope::from_domains(domains)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(raw: &str) -> Scope {
        raw.parse().unwrap()
    }

    fn t(raw: &str) -> ScopeTemplate {
        raw.parse().unwrap()
    }

    #[test]
    fn test_superset_exact() {
        assert!(is_superset(&s("a:b:c"), &s("a:b:c")));
        assert!(!is_superset(&s("a:b:c"), &s("a:b:d")));
    }

    #[test]
    fn test_superset_single_wildcard() {
        assert!(is_superset(&s("a:*:c"), &s("a:b:c")));
        // A single `*` must not match a multi-segment domain.
        assert!(!is_superset(&s("a:*:c"), &s("a:b.c:c")));
        // A literal never covers `*`.
        assert!(!is_superset(&s("a:b:c"), &s("a:*:c")));
        // But `*` covers `*`.
        assert!(is_superset(&s("a:*:c"), &s("a:*:c")));
    }

    #[test]
    fn test_superset_any_suffix() {
        assert!(is_superset(&s("a:b:**"), &s("a:b:c.d")));
        // `**` expands to zero segments too.
        assert!(is_superset(&s("a:b.**:c"), &s("a:b:c")));
        assert!(is_superset(&s("a:**:c"), &s("a:b.c.d:c")));
        assert!(is_superset(&s("a:**:c"), &s("a:*.d:c")));
        // A bounded pattern cannot cover an unbounded scope.
        assert!(!is_superset(&s("a:*:c"), &s("a:**:c")));
        assert!(is_superset(&s("a:**:c"), &s("a:**:c")));
    }

    #[test]
    fn test_superset_empty_domain() {
        assert!(is_superset(&s("a::c"), &s("a::c")));
        assert!(!is_superset(&s("a::c"), &s("a:b:c")));
        assert!(!is_superset(&s("a:b:c"), &s("a::c")));
        // `**` covers the empty domain as well.
        assert!(is_superset(&s("a:**:c"), &s("a::c")));
    }

    #[test]
    fn test_set_superset() {
        let patterns = vec![s("a:b:**"), s("x:y:z")];
        assert!(set_is_superset(&patterns, &[s("a:b:c"), s("x:y:z")]));
        assert!(!set_is_superset(&patterns, &[s("a:c:c")]));
        // The empty set covers the empty set and nothing else.
        assert!(set_is_superset(&[], &[]));
        assert!(!set_is_superset(&[], &[s("a:b:c")]));
    }

    #[test]
    fn test_simplify_removes_covered() {
        let out = simplify(&[s("a:b:c"), s("a:b:**"), s("a:b:c.d")]);
        assert_eq!(out, vec![s("a:b:**")]);
    }

    #[test]
    fn test_simplify_keeps_unrelated() {
        let out = simplify(&[s("a:b:c"), s("x:y:z"), s("a:b:c")]);
        assert_eq!(out, vec![s("a:b:c"), s("x:y:z")]);
    }

    #[test]
    fn test_simplify_idempotent_and_order_independent() {
        let forward = vec![s("a:**:c"), s("a:b:c"), s("q:r:s"), s("a:b.c:c")];
        let mut reversed = forward.clone();
        reversed.reverse();
        let once = simplify(&forward);
        assert_eq!(once, simplify(&reversed));
        assert_eq!(once, simplify(&once));
    }

    #[test]
    fn test_simplify_never_loses_coverage() {
        let set = vec![s("a:b:**"), s("a:b:c")];
        let simplified = simplify(&set);
        assert!(set_is_superset(&simplified, &[s("a:b:c.d"), s("a:b:c")]));
    }

    #[test]
    fn test_inject() {
        let templates = vec![t("authx:user.{x}:r"), t("authx:client.{missing}:r")];
        let mut values = HashMap::new();
        values.insert("x".to_string(), "abc".to_string());

        let out = inject(&templates, &values).unwrap();
        assert_eq!(out, vec![s("authx:user.abc:r")]);

        // No values at all: every variable-bearing template is dropped.
        assert!(inject(&templates, &HashMap::new()).unwrap().is_empty());
    }

    #[test]
    fn test_intersect() {
        assert_eq!(intersect(&s("a:b:**"), &s("a:b:c.d")), Some(s("a:b:c.d")));
        assert_eq!(intersect(&s("a:*:c"), &s("a:b:c")), Some(s("a:b:c")));
        assert_eq!(intersect(&s("a:*:c"), &s("a:**:c")), Some(s("a:*:c")));
        assert_eq!(intersect(&s("a:b:c"), &s("a:b:d")), None);
        assert_eq!(intersect(&s("a:b:c"), &s("a:b.x:c")), None);
        assert_eq!(intersect(&s("a:**:c"), &s("a::c")), Some(s("a::c")));
    }

    #[test]
    fn test_set_intersection() {
        let ceiling = vec![s("authx:user.**:**")];
        let access = vec![s("authx:user.abc:r"), s("authx:client.xyz:r")];
        assert_eq!(
            set_intersection(&ceiling, &access),
            vec![s("authx:user.abc:r")]
        );
    }

    #[test]
    fn test_compact_generalizes_when_safe() {
        // Everything in the exhaustive list is granted, so the fully
        // collapsed scope grants nothing new.
        let all = vec![s("authx:user.abc:r"), s("authx:user.abc:w")];
        let granted = all.clone();
        assert_eq!(compact(&granted, &all), vec![s("**:**:**")]);
    }

    #[test]
    fn test_compact_stays_narrow_when_unsafe() {
        let all = vec![
            s("authx:user.abc:r"),
            s("authx:user.abc:w"),
            s("authx:user.xyz:r"),
        ];
        let granted = vec![s("authx:user.abc:r"), s("authx:user.abc:w")];
        // "authx:user.**:**" or "authx:**:**" would newly grant the xyz
        // scope; the per-scope action cut is the most general safe one.
        assert_eq!(compact(&granted, &all), vec![s("authx:user.abc:**")]);
    }

    #[test]
    fn test_compact_keeps_ungeneralizable() {
        let all = vec![s("authx:user.abc:r"), s("authx:user.abc:w")];
        let granted = vec![s("authx:user.abc:r")];
        assert_eq!(compact(&granted, &all), granted);
    }
}
