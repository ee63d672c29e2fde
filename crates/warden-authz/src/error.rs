//! Error types for capability authorization.

use thiserror::Error;
use warden_core::ScopeSet;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthzError {
    /// The caller lacks scopes the capability requires.
    #[error("insufficient scope for '{capability}': missing {missing}")]
    InsufficientScope {
        capability: String,
        missing: ScopeSet,
    },

    /// No capability with this id is registered. Always denied.
    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    /// A capability id was registered twice.
    #[error("capability already registered: {0}")]
    DuplicateCapability(String),
}

impl AuthzError {
    /// Scopes a step-up authorization should request, if any.
    pub fn missing_scopes(&self) -> Option<&ScopeSet> {
        match self {
            AuthzError::InsufficientScope { missing, .. } => Some(missing),
            _ => None,
        }
    }
}
