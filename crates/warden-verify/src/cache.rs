//! Bounded cache of verification results keyed by token hash.
//!
//! Entries hold signature-verified claims, not audience decisions, so the
//! audience policy is re-applied on every hit. Each entry lives until the
//! earlier of the configured TTL and the token's own expiry.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use warden_core::VerifiedClaims;

#[derive(Debug, Clone)]
struct CacheEntry {
    claims: VerifiedClaims,
    inserted_at: Instant,
    expires_at: Instant,
}

/// Read-mostly cache; concurrent inserts for the same token are idempotent.
#[derive(Debug)]
pub struct VerificationCache {
    ttl: Duration,
    capacity: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl VerificationCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Hex SHA-256 of the token. Raw tokens are never used as keys.
    pub fn key(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    pub fn get(&self, token: &str) -> Option<VerifiedClaims> {
        if self.capacity == 0 {
            return None;
        }
        let key = Self::key(token);
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(&key)?;
        if entry.expires_at <= Instant::now() || entry.claims.is_expired() {
            return None;
        }
        Some(entry.claims.clone())
    }

    pub fn insert(&self, token: &str, claims: &VerifiedClaims) {
        if self.capacity == 0 || self.ttl.is_zero() {
            return;
        }

        let now = Instant::now();
        let mut lifetime = self.ttl;
        if let Some(exp) = claims.expires_at {
            let remaining = (exp - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            lifetime = lifetime.min(remaining);
        }
        if lifetime.is_zero() {
            return;
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let key = Self::key(token);
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                claims: claims.clone(),
                inserted_at: now,
                expires_at: now + lifetime,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
