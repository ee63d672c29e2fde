//! Per-principal exclusive locks.
//!
//! Every background refresh for a principal runs while holding that
//! principal's [`LockGuard`]. Refreshes for different principals never
//! contend. Callers only see [`LockManager`], so the process-local
//! implementation here can be replaced by a distributed one.

use crate::error::LockError;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;
use warden_core::PrincipalId;

/// Hands out exclusive, time-bounded locks keyed by principal.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Wait for the principal's lock, up to the manager's timeout.
    async fn acquire(&self, principal: &PrincipalId) -> Result<LockGuard, LockError>;
}

/// Proof of holding a principal's lock. Dropping it releases the lock.
pub struct LockGuard {
    principal: PrincipalId,
    holder: Uuid,
    acquired_at: Instant,
    _release: Box<dyn Any + Send>,
}

impl LockGuard {
    /// Wrap a backend-specific handle whose drop releases the lock.
    pub fn new(principal: PrincipalId, release: Box<dyn Any + Send>) -> Self {
        let guard = Self {
            principal,
            holder: Uuid::new_v4(),
            acquired_at: Instant::now(),
            _release: release,
        };
        tracing::trace!(principal = %guard.principal, holder = %guard.holder, "Acquired principal lock");
        guard
    }

    pub fn principal(&self) -> &PrincipalId {
        &self.principal
    }

    pub fn holder(&self) -> Uuid {
        self.holder
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        tracing::trace!(
            principal = %self.principal,
            holder = %self.holder,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Released principal lock"
        );
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("principal", &self.principal)
            .field("holder", &self.holder)
            .finish()
    }
}

/// In-process [`LockManager`] backed by one async mutex per principal.
///
/// Idle entries are pruned on each acquisition.
#[derive(Debug)]
pub struct LocalLockManager {
    locks: Mutex<HashMap<PrincipalId, Arc<tokio::sync::Mutex<()>>>>,
    timeout: Duration,
}

impl LocalLockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of principals with a held or awaited lock.
    pub fn tracked(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        locks.len()
    }

    fn slot(&self, principal: &PrincipalId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map references an idle slot.
        locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        locks.entry(principal.clone()).or_default().clone()
    }
}

#[async_trait]
impl LockManager for LocalLockManager {
    async fn acquire(&self, principal: &PrincipalId) -> Result<LockGuard, LockError> {
        let slot = self.slot(principal);
        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(LockGuard::new(principal.clone(), Box::new(guard))),
            Err(_) => {
                tracing::warn!(
                    principal = %principal,
                    waited_ms = self.timeout.as_millis() as u64,
                    "Timed out waiting for principal lock"
                );
                Err(LockError::Timeout {
                    principal: principal.clone(),
                    waited: self.timeout,
                })
            }
        }
    }
}
