//! Error types for the broker, the refresh token store and the IdP client.

use std::time::Duration;
use thiserror::Error;
use warden_core::{PrincipalId, ScopeSet};

/// Refresh token store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic rotation lost: the stored generation moved on.
    #[error("generation conflict for {principal}: expected {expected}, found {actual:?}")]
    Conflict {
        principal: PrincipalId,
        expected: u64,
        actual: Option<u64>,
    },

    /// A sealed secret failed authentication. The key is wrong or the
    /// record was tampered with; this is never treated as "no record".
    #[error("failed to decrypt refresh token for {principal}: wrong key or tampered record")]
    Decryption { principal: PrincipalId },

    #[error("failed to encrypt refresh token: {0}")]
    Encryption(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("storage misconfigured: {0}")]
    Misconfigured(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this error indicates misconfiguration rather than a passing fault.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Decryption { .. } | StoreError::Corrupt(_) | StoreError::Misconfigured(_)
        )
    }
}

/// Failure to obtain a principal's lock.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock on {principal}")]
    Timeout {
        principal: PrincipalId,
        waited: Duration,
    },

    #[error("lock backend unavailable for {principal}: {reason}")]
    Backend {
        principal: PrincipalId,
        reason: String,
    },
}

/// Identity-provider token endpoint failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdpError {
    /// The grant is void (`invalid_grant`).
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// The provider refused the request by policy.
    #[error("request denied ({code}): {description}")]
    Denied { code: String, description: String },

    /// The requested scope or audience cannot be granted.
    #[error("scope not grantable: {0}")]
    ScopeNotGrantable(String),

    /// Network failure, timeout, 5xx or 429.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    /// The response could not be understood.
    #[error("unexpected response from identity provider: {0}")]
    Protocol(String),
}

impl IdpError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IdpError::Unavailable(_))
    }
}

impl From<reqwest::Error> for IdpError {
    fn from(err: reqwest::Error) -> Self {
        IdpError::Unavailable(err.to_string())
    }
}

/// Errors returned by [`TokenBroker`](crate::TokenBroker).
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Token exchange was refused by policy.
    #[error("token exchange denied: {0}")]
    ExchangeDenied(String),

    /// The provider cannot grant the requested scope or audience.
    #[error("scope not grantable: {0}")]
    ScopeNotGrantable(String),

    /// A background request asked for more than was originally granted.
    #[error("requested scopes exceed the grant for {principal}: {excess}")]
    ScopeEscalationDenied {
        principal: PrincipalId,
        requested: ScopeSet,
        excess: ScopeSet,
    },

    /// The refresh grant was refused by policy without being revoked.
    #[error("refresh denied: {0}")]
    RefreshDenied(String),

    /// The principal's grant is gone. Permanent until consent is given again.
    #[error("consent revoked for {0}")]
    ConsentRevoked(PrincipalId),

    /// The identity provider could not be reached after bounded retries.
    #[error("identity provider unavailable: {0}")]
    IdpUnavailable(String),

    /// The principal's lock could not be taken in time.
    #[error("lock timeout for {0}")]
    LockTimeout(PrincipalId),

    /// The operation is not available in this deployment mode.
    #[error("not supported in this deployment: {0}")]
    NotSupported(&'static str),

    /// The inbound credential does not fit the outbound strategy.
    #[error("inbound credential unusable: {0}")]
    InboundCredential(&'static str),

    #[error("unexpected response from identity provider: {0}")]
    Protocol(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrokerError {
    /// Whether the caller may retry the whole operation later.
    pub fn is_retryable(&self) -> bool {
        match self {
            BrokerError::IdpUnavailable(_) | BrokerError::LockTimeout(_) => true,
            BrokerError::Store(err) => !err.is_fatal(),
            _ => false,
        }
    }

    /// Whether retrying can never succeed without outside intervention.
    /// Schedulers must stop on these.
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// Whether the principal must grant consent again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, BrokerError::ConsentRevoked(_))
    }
}

impl From<LockError> for BrokerError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { principal, .. } | LockError::Backend { principal, .. } => {
                BrokerError::LockTimeout(principal)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let alice = PrincipalId::new("alice");
        assert!(BrokerError::IdpUnavailable("503".into()).is_retryable());
        assert!(BrokerError::LockTimeout(alice.clone()).is_retryable());

        let revoked = BrokerError::ConsentRevoked(alice.clone());
        assert!(revoked.is_terminal());
        assert!(revoked.requires_reauthorization());

        assert!(BrokerError::ExchangeDenied("no".into()).is_terminal());
        assert!(BrokerError::Store(StoreError::Decryption { principal: alice }).is_terminal());
    }
}
