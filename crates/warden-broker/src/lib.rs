//! # warden-broker
//!
//! Obtains the credentials Warden presents to the resource service.
//!
//! - [`TokenBroker`] picks the outbound credential for a request and runs
//!   both acquisition paths: RFC 8693 session delegation and background
//!   refresh from a stored grant.
//! - [`RefreshTokenStore`] keeps one AES-256-GCM sealed refresh grant per
//!   principal and rotates it under a generation check.
//! - [`LockManager`] serializes background refreshes per principal.
//! - [`TokenEndpoint`] is the identity-provider seam; [`HttpTokenEndpoint`]
//!   is the production client.
//!
//! Errors carry [`BrokerError::is_retryable`] and [`BrokerError::is_terminal`]
//! so schedulers stop on revoked consent and back off on outages.

pub mod broker;
pub mod crypto;
pub mod error;
pub mod exchange;
pub mod idp;
pub mod lock;
pub mod refresh;
pub mod retry;
pub mod store;

pub use broker::{InboundCredential, OutboundCredential, OutboundStrategy, TokenBroker};
pub use crypto::TokenCipher;
pub use error::{BrokerError, IdpError, LockError, StoreError};
pub use exchange::{DelegatedToken, TokenExchanger};
pub use idp::{HttpTokenEndpoint, TokenEndpoint, TokenResponse};
pub use lock::{LocalLockManager, LockGuard, LockManager};
pub use refresh::BackgroundRefresher;
pub use retry::RetryPolicy;
pub use store::{
    MemoryBackend, RecordBackend, RefreshGrant, RefreshTokenRecord, RefreshTokenStore,
    SqliteBackend,
};
