//! The scope authorizer.
//!
//! Capabilities are checked twice: once when listing, so a caller never sees
//! what it cannot invoke, and again at invocation, because a listing can be
//! stale by the time a call arrives.

use crate::capability::{CapabilityDescriptor, Classification};
use crate::error::AuthzError;
use std::collections::BTreeMap;
use std::sync::RwLock;
use warden_core::{ScopeSet, VerifiedClaims};

/// Registry of capabilities and their required scopes.
#[derive(Debug, Default)]
pub struct ScopeAuthorizer {
    capabilities: RwLock<BTreeMap<String, CapabilityDescriptor>>,
}

impl ScopeAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability.
    pub fn register(
        &self,
        capability_id: impl Into<String>,
        required_scopes: ScopeSet,
        classification: Classification,
    ) -> Result<(), AuthzError> {
        let descriptor = CapabilityDescriptor::new(capability_id, required_scopes, classification);
        let mut capabilities = self.capabilities.write().unwrap_or_else(|e| e.into_inner());
        if capabilities.contains_key(&descriptor.id) {
            return Err(AuthzError::DuplicateCapability(descriptor.id));
        }

        tracing::debug!(
            capability = %descriptor.id,
            required = %descriptor.required_scopes,
            classification = %descriptor.classification,
            "Registered capability"
        );
        capabilities.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    pub fn get(&self, capability_id: &str) -> Option<CapabilityDescriptor> {
        self.capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(capability_id)
            .cloned()
    }

    /// Every capability the claims' scopes satisfy, ordered by id.
    pub fn filter_capabilities(&self, claims: &VerifiedClaims) -> Vec<CapabilityDescriptor> {
        self.capabilities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|c| c.is_satisfied_by(&claims.scopes))
            .cloned()
            .collect()
    }

    /// Check at invocation time that the caller may run `capability_id`.
    pub fn authorize(
        &self,
        capability_id: &str,
        claims: &VerifiedClaims,
    ) -> Result<CapabilityDescriptor, AuthzError> {
        let Some(capability) = self.get(capability_id) else {
            tracing::warn!(
                capability = capability_id,
                subject = %claims.subject,
                "Denied unknown capability"
            );
            return Err(AuthzError::UnknownCapability(capability_id.to_string()));
        };

        let missing = capability.missing_from(&claims.scopes);
        if !missing.is_empty() {
            tracing::info!(
                capability = capability_id,
                subject = %claims.subject,
                missing = %missing,
                "Insufficient scope"
            );
            return Err(AuthzError::InsufficientScope {
                capability: capability_id.to_string(),
                missing,
            });
        }

        Ok(capability)
    }

    /// Union of every registered capability's required scopes.
    pub fn supported_scopes(&self) -> ScopeSet {
        let capabilities = self.capabilities.read().unwrap_or_else(|e| e.into_inner());
        let mut scopes = ScopeSet::new();
        for capability in capabilities.values() {
            scopes.extend(capability.required_scopes.iter());
        }
        scopes
    }

    pub fn len(&self) -> usize {
        self.capabilities.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
