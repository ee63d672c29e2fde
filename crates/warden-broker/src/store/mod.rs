//! Encrypted, per-principal refresh token storage.
//!
//! [`RefreshTokenStore`] seals secrets with a [`TokenCipher`] and delegates
//! persistence to a [`RecordBackend`]. Backends only ever see ciphertext.

pub mod memory;
pub mod sqlite;

use crate::crypto::TokenCipher;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use warden_core::{PrincipalId, ScopeSet, SecretString};

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// A refresh grant as persisted: ciphertext only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub principal: PrincipalId,
    pub sealed_secret: Vec<u8>,
    pub granted_scopes: ScopeSet,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A decrypted refresh grant. Lives only inside the principal's lock.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub principal: PrincipalId,
    pub refresh_secret: SecretString,
    pub granted_scopes: ScopeSet,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence for sealed records.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Insert a record at generation 1, or replace an existing record's
    /// secret and scopes and advance its generation. Returns the generation.
    async fn upsert(
        &self,
        principal: &PrincipalId,
        sealed_secret: Vec<u8>,
        granted_scopes: &ScopeSet,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn get(&self, principal: &PrincipalId) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Replace the sealed secret if the stored generation equals
    /// `expected_generation`, advancing it by one. Returns the new generation
    /// or [`StoreError::Conflict`].
    async fn compare_and_swap(
        &self,
        principal: &PrincipalId,
        expected_generation: u64,
        sealed_secret: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Remove the record. Returns whether one existed.
    async fn remove(&self, principal: &PrincipalId) -> Result<bool, StoreError>;

    /// Release connections.
    async fn close(&self) {}
}

/// Encrypted refresh token storage.
#[derive(Clone)]
pub struct RefreshTokenStore {
    backend: Arc<dyn RecordBackend>,
    cipher: TokenCipher,
}

impl RefreshTokenStore {
    pub fn new(backend: Arc<dyn RecordBackend>, cipher: TokenCipher) -> Self {
        Self { backend, cipher }
    }

    /// Store a freshly consented grant.
    pub async fn store(
        &self,
        principal: &PrincipalId,
        refresh_secret: &SecretString,
        granted_scopes: &ScopeSet,
    ) -> Result<u64, StoreError> {
        let sealed = self.cipher.seal(principal, refresh_secret)?;
        let generation = self
            .backend
            .upsert(principal, sealed, granted_scopes, Utc::now())
            .await?;
        tracing::info!(
            principal = %principal,
            generation,
            scopes = %granted_scopes,
            "Stored refresh grant"
        );
        Ok(generation)
    }

    /// Load and decrypt a principal's grant.
    ///
    /// A record that fails to decrypt is an error, never `None`.
    pub async fn load(&self, principal: &PrincipalId) -> Result<Option<RefreshGrant>, StoreError> {
        let Some(record) = self.backend.get(principal).await? else {
            return Ok(None);
        };

        let refresh_secret = self.cipher.open(principal, &record.sealed_secret).inspect_err(|e| {
            tracing::error!(principal = %principal, error = %e, "Stored refresh token failed to decrypt");
        })?;

        Ok(Some(RefreshGrant {
            principal: record.principal,
            refresh_secret,
            granted_scopes: record.granted_scopes,
            generation: record.generation,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }))
    }

    /// Replace the secret, guarded by the expected generation.
    pub async fn rotate(
        &self,
        principal: &PrincipalId,
        expected_generation: u64,
        new_material: &SecretString,
    ) -> Result<u64, StoreError> {
        let sealed = self.cipher.seal(principal, new_material)?;
        let generation = self
            .backend
            .compare_and_swap(principal, expected_generation, sealed, Utc::now())
            .await?;
        tracing::debug!(principal = %principal, generation, "Rotated refresh token");
        Ok(generation)
    }

    pub async fn delete(&self, principal: &PrincipalId) -> Result<bool, StoreError> {
        let existed = self.backend.remove(principal).await?;
        if existed {
            tracing::info!(principal = %principal, "Deleted refresh grant");
        }
        Ok(existed)
    }

    /// Raw sealed record, for inspection and tests.
    pub async fn record(&self, principal: &PrincipalId) -> Result<Option<RefreshTokenRecord>, StoreError> {
        self.backend.get(principal).await
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::EncryptionKey;

    fn store() -> RefreshTokenStore {
        RefreshTokenStore::new(
            Arc::new(MemoryBackend::new()),
            TokenCipher::new(&EncryptionKey::from_bytes([9; 32])),
        )
    }

    #[tokio::test]
    async fn test_store_load_rotate_delete() {
        let store = store();
        let alice = PrincipalId::new("alice");
        let scopes = ScopeSet::parse("read write");

        assert_eq!(store.store(&alice, &SecretString::new("rt-1"), &scopes).await.unwrap(), 1);

        let grant = store.load(&alice).await.unwrap().unwrap();
        assert_eq!(grant.refresh_secret.expose(), "rt-1");
        assert_eq!(grant.granted_scopes, scopes);
        assert_eq!(grant.generation, 1);

        let generation = store.rotate(&alice, 1, &SecretString::new("rt-2")).await.unwrap();
        assert_eq!(generation, 2);
        let grant = store.load(&alice).await.unwrap().unwrap();
        assert_eq!(grant.refresh_secret.expose(), "rt-2");
        assert_eq!(grant.granted_scopes, scopes);

        assert!(store.delete(&alice).await.unwrap());
        assert!(store.load(&alice).await.unwrap().is_none());
        assert!(!store.delete(&alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_with_stale_generation_conflicts() {
        let store = store();
        let alice = PrincipalId::new("alice");
        store
            .store(&alice, &SecretString::new("rt-1"), &ScopeSet::parse("read"))
            .await
            .unwrap();
        store.rotate(&alice, 1, &SecretString::new("rt-2")).await.unwrap();

        let err = store
            .rotate(&alice, 1, &SecretString::new("rt-stale"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict { expected: 1, actual: Some(2), .. }
        ));
        let grant = store.load(&alice).await.unwrap().unwrap();
        assert_eq!(grant.refresh_secret.expose(), "rt-2");
    }

    #[tokio::test]
    async fn test_wrong_key_is_error_not_empty() {
        let backend: Arc<dyn RecordBackend> = Arc::new(MemoryBackend::new());
        let alice = PrincipalId::new("alice");
        RefreshTokenStore::new(backend.clone(), TokenCipher::new(&EncryptionKey::from_bytes([1; 32])))
            .store(&alice, &SecretString::new("rt-1"), &ScopeSet::new())
            .await
            .unwrap();

        let other = RefreshTokenStore::new(backend, TokenCipher::new(&EncryptionKey::from_bytes([2; 32])));
        let err = other.load(&alice).await.unwrap_err();
        assert!(matches!(err, StoreError::Decryption { .. }));
    }

    #[tokio::test]
    async fn test_record_holds_no_plaintext() {
        let store = store();
        let alice = PrincipalId::new("alice");
        store
            .store(&alice, &SecretString::new("plaintext-refresh"), &ScopeSet::new())
            .await
            .unwrap();
        let record = store.record(&alice).await.unwrap().unwrap();
        let needle = b"plaintext-refresh";
        assert!(!record.sealed_secret.windows(needle.len()).any(|w| w == needle));
    }
}
