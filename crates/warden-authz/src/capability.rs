//! Capability descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use warden_core::ScopeSet;

/// Whether a capability only reads or also mutates downstream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Read,
    Write,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Read => f.write_str("read"),
            Classification::Write => f.write_str("write"),
        }
    }
}

/// A callable operation and the minimal scopes needed to invoke it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub id: String,
    pub required_scopes: ScopeSet,
    pub classification: Classification,
}

impl CapabilityDescriptor {
    pub fn new(
        id: impl Into<String>,
        required_scopes: ScopeSet,
        classification: Classification,
    ) -> Self {
        Self {
            id: id.into(),
            required_scopes,
            classification,
        }
    }

    /// Whether `granted` covers every required scope.
    pub fn is_satisfied_by(&self, granted: &ScopeSet) -> bool {
        granted.satisfies(&self.required_scopes)
    }

    /// Required scopes not present in `granted`.
    pub fn missing_from(&self, granted: &ScopeSet) -> ScopeSet {
        self.required_scopes.difference(granted)
    }
}
