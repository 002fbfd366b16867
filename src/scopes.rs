use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An ordered set of permission identifiers (e.g. `mcp:read`, `mcp:*`).
///
/// Parsed from and formatted as the space-delimited `scope` string used on the
/// OAuth wire (RFC 6749 section 3.3). Ordering is stable so a formatted set is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-delimited scope string. Empty segments are dropped.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split_whitespace()
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn insert(&mut self, scope: impl Into<String>) {
        self.0.insert(scope.into());
    }

    /// Scopes in `required` that this set does not grant.
    ///
    /// A wildcard grant (`mcp:*`) covers every scope sharing its prefix, so
    /// `mcp:read` is not missing from a set granting `mcp:*`.
    pub fn missing_from(required: &ScopeSet, granted: &ScopeSet) -> ScopeSet {
        ScopeSet(
            required
                .0
                .iter()
                .filter(|scope| !granted.grants(scope))
                .cloned()
                .collect(),
        )
    }

    /// Whether this set grants a single scope, honoring `<prefix>:*` wildcards.
    pub fn grants(&self, scope: &str) -> bool {
        if self.0.contains(scope) {
            return true;
        }
        match scope.rsplit_once(':') {
            Some((prefix, _)) => self.0.contains(&format!("{}:*", prefix)),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", scope)?;
            first = false;
        }
        Ok(())
    }
}
