//! Process-local record backend.

use super::{RecordBackend, RefreshTokenRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use warden_core::{PrincipalId, ScopeSet};

/// Records held in memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<PrincipalId, RefreshTokenRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn upsert(
        &self,
        principal: &PrincipalId,
        sealed_secret: Vec<u8>,
        granted_scopes: &ScopeSet,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(principal) {
            Some(record) => {
                record.sealed_secret = sealed_secret;
                record.granted_scopes = granted_scopes.clone();
                record.generation += 1;
                record.updated_at = now;
                Ok(record.generation)
            }
            None => {
                records.insert(
                    principal.clone(),
                    RefreshTokenRecord {
                        principal: principal.clone(),
                        sealed_secret,
                        granted_scopes: granted_scopes.clone(),
                        generation: 1,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn get(&self, principal: &PrincipalId) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.records.read().await.get(principal).cloned())
    }

    async fn compare_and_swap(
        &self,
        principal: &PrincipalId,
        expected_generation: u64,
        sealed_secret: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(principal) {
            Some(record) if record.generation == expected_generation => {
                record.sealed_secret = sealed_secret;
                record.generation += 1;
                record.updated_at = now;
                Ok(record.generation)
            }
            other => Err(StoreError::Conflict {
                principal: principal.clone(),
                expected: expected_generation,
                actual: other.map(|r| r.generation),
            }),
        }
    }

    async fn remove(&self, principal: &PrincipalId) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(principal).is_some())
    }
}
