//! Listener, verifier and broker tuning.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Externally visible base URL, used as the resource identifier in
    /// protected-resource metadata and challenges.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            public_url: None,
        }
    }
}

impl ServerConfig {
    /// Base URL of this service, falling back to the listen address.
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.listen),
        }
    }
}

/// Token verification tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Upper bound on how long a verification result is cached.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Maximum number of cached verification results.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Minimum interval between JWKS refetches for one issuer.
    #[serde(default = "default_jwks_refresh")]
    pub jwks_min_refresh_secs: u64,

    /// Timeout for discovery, JWKS and introspection calls.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Clock skew allowance for `exp`.
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
            jwks_min_refresh_secs: default_jwks_refresh(),
            http_timeout_secs: default_http_timeout(),
            leeway_secs: default_leeway(),
        }
    }
}

impl VerifierConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn jwks_min_refresh(&self) -> Duration {
        Duration::from_secs(self.jwks_min_refresh_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Token broker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Maximum wait for a principal's refresh lock.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Timeout for each call to the token endpoint.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Retry policy for transient identity-provider failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout(),
            http_timeout_secs: default_http_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Bounded exponential backoff with full jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_jwks_refresh() -> u64 {
    30
}

fn default_http_timeout() -> u64 {
    10
}

fn default_leeway() -> u64 {
    30
}

fn default_lock_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}
