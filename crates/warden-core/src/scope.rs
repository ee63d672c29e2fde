//! OAuth scope sets.
//!
//! A [`ScopeSet`] is an unordered set of scope names. It parses from and
//! renders to the space-delimited form used by the `scope` claim and the
//! `scope` request parameter (RFC 6749 §3.3).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// A set of OAuth scopes.
///
/// Backed by a `BTreeSet` so rendering is deterministic, which keeps
/// challenge headers and log lines stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeSet {
    scopes: BTreeSet<String>,
}

impl ScopeSet {
    /// An empty scope set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-delimited scope string. Empty entries are ignored.
    pub fn parse(raw: &str) -> Self {
        raw.split_whitespace().map(String::from).collect()
    }

    /// Add a scope.
    pub fn insert(&mut self, scope: impl Into<String>) -> bool {
        self.scopes.insert(scope.into())
    }

    /// Remove a scope.
    pub fn remove(&mut self, scope: &str) -> bool {
        self.scopes.remove(scope)
    }

    /// Whether the set contains `scope`.
    pub fn contains(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// True if every scope in `self` is also in `other`.
    pub fn is_subset(&self, other: &ScopeSet) -> bool {
        self.scopes.is_subset(&other.scopes)
    }

    /// True if `self` contains every scope in `other`.
    pub fn satisfies(&self, required: &ScopeSet) -> bool {
        required.is_subset(self)
    }

    /// Scopes in `self` that are not in `other`.
    pub fn difference(&self, other: &ScopeSet) -> ScopeSet {
        self.scopes.difference(&other.scopes).cloned().collect()
    }

    /// Union of both sets.
    pub fn union(&self, other: &ScopeSet) -> ScopeSet {
        self.scopes.union(&other.scopes).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(String::as_str)
    }

    /// Render in space-delimited form.
    pub fn to_scope_string(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }

    /// Scopes as an owned vector, sorted.
    pub fn to_vec(&self) -> Vec<String> {
        self.scopes.iter().cloned().collect()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_scope_string())
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            scopes: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<String>> Extend<S> for ScopeSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.scopes.extend(iter.into_iter().map(Into::into));
    }
}

impl<'a> IntoIterator for &'a ScopeSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.scopes.iter()
    }
}

// Serialized as a list so stored records stay readable with jq.
impl Serialize for ScopeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.scopes.iter())
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let scopes = Vec::<String>::deserialize(deserializer)?;
        Ok(scopes.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_order_independent() {
        let a = ScopeSet::parse("notes:read  notes:write calendar:read");
        let b = ScopeSet::parse("calendar:read notes:write notes:read");
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_parse_empty() {
        assert!(ScopeSet::parse("").is_empty());
        assert!(ScopeSet::parse("   ").is_empty());
    }

    #[test]
    fn test_subset_and_difference() {
        let granted = ScopeSet::parse("read write");
        let wanted = ScopeSet::parse("read admin");

        assert!(!wanted.is_subset(&granted));
        assert_eq!(wanted.difference(&granted), ScopeSet::parse("admin"));
        assert!(granted.satisfies(&ScopeSet::parse("read")));
        assert!(granted.satisfies(&ScopeSet::new()));
    }

    #[test]
    fn test_scope_string_is_sorted() {
        let scopes = ScopeSet::parse("b c a");
        assert_eq!(scopes.to_scope_string(), "a b c");
    }

    #[test]
    fn test_serde_as_list() {
        let scopes = ScopeSet::parse("write read");
        let json = serde_json::to_value(&scopes).unwrap();
        assert_eq!(json, serde_json::json!(["read", "write"]));

        let back: ScopeSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, scopes);
    }
}
