//! Configuration types for Warden.
//!
//! Configuration is loaded from a single YAML file (`warden.yaml`) into a
//! [`WardenConfig`]. Nothing here is acted on directly: call
//! [`WardenConfig::resolve`] to obtain the [`DeploymentMode`] that the rest of
//! the process runs with.
//!
//! ```yaml
//! mode: auto
//! resource:
//!   url: https://notes.internal.example.com
//! oauth:
//!   issuer: https://idp.example.com/realms/main
//!   audience: mcp
//!   resource_audience: resource
//!   token_exchange: true
//!   client_id: warden
//!   client_secret_env: WARDEN_CLIENT_SECRET
//! storage:
//!   path: data/warden.db
//!   encryption_key_env: WARDEN_ENCRYPTION_KEY
//! capabilities:
//!   - id: notes.search
//!     scopes: ["notes:read"]
//!   - id: notes.update
//!     scopes: ["notes:read", "notes:write"]
//!     write: true
//! ```

pub mod oauth;
pub mod secret;
pub mod server;
pub mod storage;

use crate::error::ConfigError;
use crate::mode::{self, DeploymentMode, ModeKind};
use crate::scope::ScopeSet;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use oauth::{EndpointOverrides, OAuthConfig};
pub use secret::SecretSource;
pub use server::{BrokerConfig, RetryConfig, ServerConfig, VerifierConfig};
pub use storage::{StorageBackend, StorageConfig};

/// Complete Warden configuration loaded from file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Explicit deployment mode, or `auto` / absent to detect it.
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode: Option<ModeKind>,

    /// Run without any durable state, forwarding each caller's token.
    #[serde(default)]
    pub stateless: bool,

    /// Forward each caller's own basic credentials to the resource service.
    #[serde(default)]
    pub passthrough: bool,

    /// Downstream resource service.
    #[serde(default)]
    pub resource: ResourceConfig,

    /// Fixed credentials for single-user deployments.
    #[serde(default)]
    pub static_credentials: Option<StaticCredentialsConfig>,

    /// Identity provider.
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Refresh-token storage.
    #[serde(default)]
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub verifier: VerifierConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    /// Capabilities exposed to callers and the scopes each requires.
    #[serde(default)]
    pub capabilities: Vec<CapabilityConfig>,
}

/// The downstream resource service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Base URL of the resource service.
    #[serde(default)]
    pub url: Option<String>,
}

/// A capability and its minimal required scopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub id: String,

    #[serde(default)]
    pub scopes: ScopeSet,

    /// Whether the capability mutates downstream state.
    #[serde(default)]
    pub write: bool,
}

/// Credentials used for every downstream call in single-user mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticCredentialsConfig {
    pub username: Option<String>,

    /// Environment variable containing the password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Path to a file containing the password.
    #[serde(default)]
    pub password_file: Option<PathBuf>,
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    ///
    /// Relative storage and secret-file paths are resolved against the
    /// directory containing the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.anchor_paths(&base_dir);
        Ok(config)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })
    }

    /// Resolve the deployment mode this configuration describes.
    ///
    /// Secrets are read here, once. Every conflicting or missing setting is
    /// reported in a single [`ConfigError::Invalid`].
    pub fn resolve(&self) -> Result<DeploymentMode, ConfigError> {
        mode::resolve(self)
    }

    fn anchor_paths(&mut self, base_dir: &Path) {
        let mut paths: Vec<&mut PathBuf> = Vec::new();
        if let Some(storage) = self.storage.as_mut() {
            paths.extend(storage.path.as_mut());
            paths.extend(storage.encryption_key_file.as_mut());
        }
        if let Some(creds) = self.static_credentials.as_mut() {
            paths.extend(creds.password_file.as_mut());
        }
        paths.extend(self.oauth.client_secret_file.as_mut());
        paths.extend(self.oauth.hmac_key_file.as_mut());

        for path in paths {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }
}

fn deserialize_mode<'de, D>(deserializer: D) -> Result<Option<ModeKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("auto") => Ok(None),
        Some(name) => name
            .parse::<ModeKind>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
