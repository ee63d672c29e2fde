//! Background tokens from durable, rotating refresh grants.
//!
//! Each call follows the same sequence under the principal's lock:
//! load the grant, check the requested scopes against it, refresh with
//! retry, and persist the rotated secret before the lock is released.

use crate::error::{BrokerError, IdpError};
use crate::idp::TokenEndpoint;
use crate::lock::LockManager;
use crate::retry::RetryPolicy;
use crate::store::RefreshTokenStore;
use std::sync::Arc;
use warden_core::{AccessToken, PrincipalId, ScopeSet, SecretString};

pub struct BackgroundRefresher {
    store: RefreshTokenStore,
    locks: Arc<dyn LockManager>,
    endpoint: Arc<dyn TokenEndpoint>,
    retry: RetryPolicy,
    audience: Vec<String>,
}

impl BackgroundRefresher {
    pub fn new(
        store: RefreshTokenStore,
        locks: Arc<dyn LockManager>,
        endpoint: Arc<dyn TokenEndpoint>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            locks,
            endpoint,
            retry,
            audience: Vec::new(),
        }
    }

    /// Audience recorded on issued tokens.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = vec![audience.into()];
        self
    }

    pub fn store(&self) -> &RefreshTokenStore {
        &self.store
    }

    /// Record a freshly consented grant for `principal`.
    pub async fn provision(
        &self,
        principal: &PrincipalId,
        refresh_secret: &SecretString,
        granted_scopes: &ScopeSet,
    ) -> Result<u64, BrokerError> {
        let _guard = self.locks.acquire(principal).await?;
        Ok(self.store.store(principal, refresh_secret, granted_scopes).await?)
    }

    /// Delete `principal`'s grant. Returns whether one existed.
    pub async fn revoke(&self, principal: &PrincipalId) -> Result<bool, BrokerError> {
        let _guard = self.locks.acquire(principal).await?;
        let existed = self.store.delete(principal).await?;
        tracing::info!(principal = %principal, existed, "Revoked refresh grant");
        Ok(existed)
    }

    pub async fn get_background_token(
        &self,
        principal: &PrincipalId,
        required_scopes: &ScopeSet,
    ) -> Result<AccessToken, BrokerError> {
        let _guard = self.locks.acquire(principal).await?;

        let Some(grant) = self.store.load(principal).await? else {
            tracing::debug!(principal = %principal, "No refresh grant on record");
            return Err(BrokerError::ConsentRevoked(principal.clone()));
        };

        if !required_scopes.is_subset(&grant.granted_scopes) {
            let excess = required_scopes.difference(&grant.granted_scopes);
            tracing::warn!(
                principal = %principal,
                requested = %required_scopes,
                granted = %grant.granted_scopes,
                excess = %excess,
                "Background request exceeds granted scopes"
            );
            return Err(BrokerError::ScopeEscalationDenied {
                principal: principal.clone(),
                requested: required_scopes.clone(),
                excess,
            });
        }

        let result = self
            .retry
            .run("refresh_token", || {
                self.endpoint.refresh(&grant.refresh_secret, required_scopes)
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(IdpError::InvalidGrant(description)) => {
                self.store.delete(principal).await?;
                tracing::warn!(
                    principal = %principal,
                    reason = %description,
                    "Refresh grant is void; record deleted, re-authorization required"
                );
                return Err(BrokerError::ConsentRevoked(principal.clone()));
            }
            Err(IdpError::Denied { code, description }) => {
                tracing::warn!(principal = %principal, code = %code, "Refresh denied");
                return Err(BrokerError::RefreshDenied(format!("{}: {}", code, description)));
            }
            Err(IdpError::ScopeNotGrantable(description)) => {
                return Err(BrokerError::ScopeNotGrantable(description));
            }
            Err(IdpError::Unavailable(description)) => {
                return Err(BrokerError::IdpUnavailable(description));
            }
            Err(IdpError::Protocol(description)) => {
                return Err(BrokerError::Protocol(description));
            }
        };

        let (token, rotated) =
            response.into_access_token(self.audience.clone(), required_scopes, Some(principal.clone()));
        let next_secret = match rotated {
            Some(secret) => secret,
            None => {
                tracing::debug!(principal = %principal, "Provider kept the refresh token; resealing");
                grant.refresh_secret
            }
        };

        let generation = self
            .store
            .rotate(principal, grant.generation, &next_secret)
            .await?;

        tracing::info!(
            principal = %principal,
            generation,
            scopes = %token.scopes,
            "Issued background token"
        );
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::TokenCipher;
    use crate::idp::TokenResponse;
    use crate::lock::LocalLockManager;
    use crate::store::MemoryBackend;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use warden_core::EncryptionKey;

    /// Issues `rt-N` refresh tokens and rejects anything but the latest.
    struct RotatingEndpoint {
        current: Mutex<String>,
        counter: AtomicU32,
        rotate: bool,
        fail_with: Mutex<Option<IdpError>>,
    }

    impl RotatingEndpoint {
        fn new(initial: &str) -> Arc<Self> {
            Arc::new(Self {
                current: Mutex::new(initial.to_string()),
                counter: AtomicU32::new(0),
                rotate: true,
                fail_with: Mutex::new(None),
            })
        }

        fn calls(&self) -> u32 {
            self.counter.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenEndpoint for RotatingEndpoint {
        async fn exchange(&self, _: &SecretString, _: &str, _: &ScopeSet) -> Result<TokenResponse, IdpError> {
            unreachable!("refresh tests never exchange")
        }

        async fn refresh(&self, refresh_token: &SecretString, scopes: &ScopeSet) -> Result<TokenResponse, IdpError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }
            let mut current = self.current.lock().unwrap();
            if refresh_token.expose() != current.as_str() {
                return Err(IdpError::InvalidGrant("stale refresh token".into()));
            }
            let mut body = serde_json::json!({
                "access_token": format!("at-{}", n),
                "expires_in": 300,
                "scope": scopes.to_scope_string(),
            });
            if self.rotate {
                *current = format!("rt-{}", n + 1);
                body["refresh_token"] = serde_json::json!(current.clone());
            }
            Ok(serde_json::from_value(body).unwrap())
        }
    }

    fn refresher(endpoint: Arc<RotatingEndpoint>) -> BackgroundRefresher {
        let store = RefreshTokenStore::new(
            Arc::new(MemoryBackend::new()),
            TokenCipher::new(&EncryptionKey::from_bytes([3; 32])),
        );
        BackgroundRefresher::new(
            store,
            Arc::new(LocalLockManager::new(Duration::from_secs(5))),
            endpoint,
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_narrows_scope() {
        let endpoint = RotatingEndpoint::new("rt-1");
        let refresher = refresher(endpoint.clone()).with_audience("resource");
        let alice = PrincipalId::new("alice");
        refresher
            .provision(&alice, &SecretString::new("rt-1"), &ScopeSet::parse("read write"))
            .await
            .unwrap();

        let token = refresher
            .get_background_token(&alice, &ScopeSet::parse("read"))
            .await
            .unwrap();
        assert_eq!(token.value.expose(), "at-1");
        assert_eq!(token.scopes, ScopeSet::parse("read"));
        assert_eq!(token.audience, vec!["resource".to_string()]);
        assert_eq!(token.subject, Some(alice.clone()));

        let grant = refresher.store().load(&alice).await.unwrap().unwrap();
        assert_eq!(grant.generation, 2);
        assert_eq!(grant.refresh_secret.expose(), "rt-2");
        assert_eq!(grant.granted_scopes, ScopeSet::parse("read write"));
    }

    #[tokio::test]
    async fn test_unrotated_secret_is_resealed() {
        let endpoint = Arc::new(RotatingEndpoint {
            current: Mutex::new("rt-fixed".into()),
            counter: AtomicU32::new(0),
            rotate: false,
            fail_with: Mutex::new(None),
        });
        let refresher = refresher(endpoint);
        let alice = PrincipalId::new("alice");
        refresher
            .provision(&alice, &SecretString::new("rt-fixed"), &ScopeSet::parse("read"))
            .await
            .unwrap();
        let before = refresher.store().record(&alice).await.unwrap().unwrap();

        refresher
            .get_background_token(&alice, &ScopeSet::parse("read"))
            .await
            .unwrap();

        let after = refresher.store().record(&alice).await.unwrap().unwrap();
        assert_eq!(after.generation, 2);
        assert_ne!(before.sealed_secret, after.sealed_secret);
        let grant = refresher.store().load(&alice).await.unwrap().unwrap();
        assert_eq!(grant.refresh_secret.expose(), "rt-fixed");
    }

    #[tokio::test]
    async fn test_denied_refresh_keeps_record() {
        let endpoint = RotatingEndpoint::new("rt-1");
        *endpoint.fail_with.lock().unwrap() = Some(IdpError::Denied {
            code: "access_denied".into(),
            description: "account locked".into(),
        });
        let refresher = refresher(endpoint.clone());
        let alice = PrincipalId::new("alice");
        refresher
            .provision(&alice, &SecretString::new("rt-1"), &ScopeSet::parse("read"))
            .await
            .unwrap();

        let err = refresher
            .get_background_token(&alice, &ScopeSet::parse("read"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::RefreshDenied(_)));
        assert!(err.is_terminal());
        assert!(!err.requires_reauthorization());
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(refresher.store().record(&alice).await.unwrap().unwrap().generation, 1);
    }

    #[tokio::test]
    async fn test_revoke_then_consent_revoked() {
        let endpoint = RotatingEndpoint::new("rt-1");
        let refresher = refresher(endpoint.clone());
        let alice = PrincipalId::new("alice");
        refresher
            .provision(&alice, &SecretString::new("rt-1"), &ScopeSet::parse("read"))
            .await
            .unwrap();

        assert!(refresher.revoke(&alice).await.unwrap());
        assert!(!refresher.revoke(&alice).await.unwrap());

        let err = refresher
            .get_background_token(&alice, &ScopeSet::parse("read"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ConsentRevoked(_)));
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let endpoint = RotatingEndpoint::new("rt-1");
        let locks = Arc::new(LocalLockManager::new(Duration::from_millis(30)));
        let store = RefreshTokenStore::new(
            Arc::new(MemoryBackend::new()),
            TokenCipher::new(&EncryptionKey::from_bytes([3; 32])),
        );
        let refresher = BackgroundRefresher::new(store, locks.clone(), endpoint.clone(), RetryPolicy::none());
        let alice = PrincipalId::new("alice");
        refresher
            .provision(&alice, &SecretString::new("rt-1"), &ScopeSet::parse("read"))
            .await
            .unwrap();

        let _held = locks.acquire(&alice).await.unwrap();
        let err = refresher
            .get_background_token(&alice, &ScopeSet::parse("read"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::LockTimeout(_)));
        assert!(err.is_retryable());
        assert_eq!(endpoint.calls(), 0);
    }
}
