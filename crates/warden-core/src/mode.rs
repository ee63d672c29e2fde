//! Deployment mode resolution.
//!
//! A [`DeploymentMode`] is resolved exactly once at startup from a
//! [`WardenConfig`]. Each variant carries only the settings that mode uses,
//! so downstream components never consult mode flags per call.
//!
//! When no mode is named explicitly it is detected with this priority:
//!
//! 1. `stateless: true` selects [`ModeKind::StatelessPerSession`]
//! 2. `oauth.token_exchange: true` selects [`ModeKind::OAuthTokenExchange`]
//! 3. `passthrough: true` selects [`ModeKind::MultiUserPassthrough`]
//! 4. a `static_credentials` section selects [`ModeKind::SingleUserStatic`]
//! 5. otherwise [`ModeKind::OAuthSharedAudience`]

use crate::config::{EndpointOverrides, SecretSource, StorageBackend, WardenConfig};
use crate::error::ConfigError;
use crate::secret::{EncryptionKey, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The five operating modes, without their settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeKind {
    #[serde(rename = "single-user-static")]
    SingleUserStatic,
    #[serde(rename = "multi-user-passthrough")]
    MultiUserPassthrough,
    #[serde(rename = "oauth-shared-audience")]
    OAuthSharedAudience,
    #[serde(rename = "oauth-token-exchange")]
    OAuthTokenExchange,
    #[serde(rename = "stateless-per-session")]
    StatelessPerSession,
}

impl ModeKind {
    pub const ALL: [ModeKind; 5] = [
        ModeKind::SingleUserStatic,
        ModeKind::MultiUserPassthrough,
        ModeKind::OAuthSharedAudience,
        ModeKind::OAuthTokenExchange,
        ModeKind::StatelessPerSession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModeKind::SingleUserStatic => "single-user-static",
            ModeKind::MultiUserPassthrough => "multi-user-passthrough",
            ModeKind::OAuthSharedAudience => "oauth-shared-audience",
            ModeKind::OAuthTokenExchange => "oauth-token-exchange",
            ModeKind::StatelessPerSession => "stateless-per-session",
        }
    }

    /// Whether this mode keeps refresh tokens for unattended work.
    pub fn is_background_capable(&self) -> bool {
        matches!(
            self,
            ModeKind::OAuthSharedAudience | ModeKind::OAuthTokenExchange
        )
    }

    /// Whether inbound bearer tokens are verified against the IdP.
    pub fn uses_oauth(&self) -> bool {
        matches!(
            self,
            ModeKind::OAuthSharedAudience
                | ModeKind::OAuthTokenExchange
                | ModeKind::StatelessPerSession
        )
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<_> = ModeKind::ALL.iter().map(ModeKind::as_str).collect();
                format!("unknown mode '{}', expected one of: auto, {}", s, names.join(", "))
            })
    }
}

/// Settings for [`ModeKind::SingleUserStatic`].
#[derive(Debug, Clone)]
pub struct StaticSettings {
    pub resource_url: String,
    pub username: String,
    pub password: SecretString,
}

/// Settings for [`ModeKind::MultiUserPassthrough`].
#[derive(Debug, Clone)]
pub struct PassthroughSettings {
    pub resource_url: String,
}

/// Identity-provider settings for the OAuth-based modes.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    /// Primary issuer.
    pub issuer: String,
    /// Primary issuer followed by any additional trusted issuers.
    pub trusted_issuers: Vec<String>,
    /// This component's own audience identifier.
    pub audience: String,
    pub resource_url: Option<String>,
    pub admin_subjects: Vec<String>,
    pub scopes_supported: Vec<String>,
    /// Static HMAC key for issuers that do not publish a JWKS.
    pub hmac_key: Option<SecretString>,
    pub endpoints: EndpointOverrides,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
}

/// Settings for RFC 8693 exchange in [`ModeKind::OAuthTokenExchange`].
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Audience requested for delegated tokens.
    pub resource_audience: String,
}

/// Durable refresh-token settings for background-capable modes.
#[derive(Debug, Clone)]
pub struct BackgroundSettings {
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub backend: StorageBackend,
    /// Database path. Always present for the SQLite backend.
    pub storage_path: Option<PathBuf>,
    pub encryption_key: EncryptionKey,
}

/// Settings for [`ModeKind::StatelessPerSession`].
#[derive(Debug, Clone)]
pub struct StatelessSettings {
    pub oauth: OAuthSettings,
}

/// The resolved operating mode. Immutable for the life of the process.
#[derive(Debug, Clone)]
pub enum DeploymentMode {
    SingleUserStatic(StaticSettings),
    MultiUserPassthrough(PassthroughSettings),
    OAuthSharedAudience {
        oauth: OAuthSettings,
        background: BackgroundSettings,
    },
    OAuthTokenExchange {
        oauth: OAuthSettings,
        exchange: ExchangeSettings,
        background: BackgroundSettings,
    },
    StatelessPerSession(StatelessSettings),
}

impl DeploymentMode {
    pub fn kind(&self) -> ModeKind {
        match self {
            DeploymentMode::SingleUserStatic(_) => ModeKind::SingleUserStatic,
            DeploymentMode::MultiUserPassthrough(_) => ModeKind::MultiUserPassthrough,
            DeploymentMode::OAuthSharedAudience { .. } => ModeKind::OAuthSharedAudience,
            DeploymentMode::OAuthTokenExchange { .. } => ModeKind::OAuthTokenExchange,
            DeploymentMode::StatelessPerSession(_) => ModeKind::StatelessPerSession,
        }
    }

    pub fn oauth(&self) -> Option<&OAuthSettings> {
        match self {
            DeploymentMode::OAuthSharedAudience { oauth, .. }
            | DeploymentMode::OAuthTokenExchange { oauth, .. }
            | DeploymentMode::StatelessPerSession(StatelessSettings { oauth }) => Some(oauth),
            _ => None,
        }
    }

    pub fn background(&self) -> Option<&BackgroundSettings> {
        match self {
            DeploymentMode::OAuthSharedAudience { background, .. }
            | DeploymentMode::OAuthTokenExchange { background, .. } => Some(background),
            _ => None,
        }
    }

    pub fn exchange(&self) -> Option<&ExchangeSettings> {
        match self {
            DeploymentMode::OAuthTokenExchange { exchange, .. } => Some(exchange),
            _ => None,
        }
    }
}

/// Collects problems while the mode's settings are assembled.
#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn push(&mut self, problem: impl Into<String>) {
        self.0.push(problem.into());
    }

    fn require<T>(&mut self, value: Option<T>, problem: &str) -> Option<T> {
        if value.is_none() {
            self.push(problem);
        }
        value
    }

    fn secret(&mut self, source: SecretSource<'_>) -> Option<SecretString> {
        match source.resolve() {
            Ok(secret) => secret,
            Err(problem) => {
                self.push(problem);
                None
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

/// Auto-detected mode for a configuration without an explicit `mode`.
pub fn detect(config: &WardenConfig) -> ModeKind {
    if config.stateless {
        ModeKind::StatelessPerSession
    } else if config.oauth.token_exchange {
        ModeKind::OAuthTokenExchange
    } else if config.passthrough {
        ModeKind::MultiUserPassthrough
    } else if config.static_credentials.is_some() {
        ModeKind::SingleUserStatic
    } else {
        ModeKind::OAuthSharedAudience
    }
}

/// Resolve a configuration into exactly one [`DeploymentMode`].
pub fn resolve(config: &WardenConfig) -> Result<DeploymentMode, ConfigError> {
    let mut problems = Problems::default();
    let kind = config.mode.unwrap_or_else(|| detect(config));

    check_conflicts(config, kind, &mut problems);

    let mode = match kind {
        ModeKind::SingleUserStatic => resolve_static(config, &mut problems)
            .map(DeploymentMode::SingleUserStatic),
        ModeKind::MultiUserPassthrough => problems
            .require(
                non_empty(&config.resource.url),
                "multi-user-passthrough mode requires resource.url",
            )
            .map(|resource_url| {
                DeploymentMode::MultiUserPassthrough(PassthroughSettings { resource_url })
            }),
        ModeKind::OAuthSharedAudience => {
            let oauth = resolve_oauth(config, kind, &mut problems);
            let background = resolve_background(config, kind, &mut problems);
            match (oauth, background) {
                (Some(oauth), Some(background)) => {
                    Some(DeploymentMode::OAuthSharedAudience { oauth, background })
                }
                _ => None,
            }
        }
        ModeKind::OAuthTokenExchange => {
            let oauth = resolve_oauth(config, kind, &mut problems);
            let exchange = resolve_exchange(config, &mut problems);
            let background = resolve_background(config, kind, &mut problems);
            match (oauth, exchange, background) {
                (Some(oauth), Some(exchange), Some(background)) => {
                    Some(DeploymentMode::OAuthTokenExchange {
                        oauth,
                        exchange,
                        background,
                    })
                }
                _ => None,
            }
        }
        ModeKind::StatelessPerSession => resolve_oauth(config, kind, &mut problems)
            .map(|oauth| DeploymentMode::StatelessPerSession(StatelessSettings { oauth })),
    };

    match mode {
        Some(mode) if problems.0.is_empty() => {
            tracing::info!(
                mode = %mode.kind(),
                explicit = config.mode.is_some(),
                "Resolved deployment mode"
            );
            Ok(mode)
        }
        _ => Err(ConfigError::invalid(problems.0)),
    }
}

fn check_conflicts(config: &WardenConfig, kind: ModeKind, problems: &mut Problems) {
    if let Some(explicit) = config.mode {
        let flags = [
            (config.stateless, "stateless", ModeKind::StatelessPerSession),
            (
                config.oauth.token_exchange,
                "oauth.token_exchange",
                ModeKind::OAuthTokenExchange,
            ),
            (config.passthrough, "passthrough", ModeKind::MultiUserPassthrough),
        ];
        for (set, flag, implies) in flags {
            if set && implies != explicit {
                problems.push(format!(
                    "mode is {} but {} is set, which selects {}",
                    explicit, flag, implies
                ));
            }
        }
    }

    if config.stateless && config.oauth.token_exchange {
        problems.push("stateless and oauth.token_exchange cannot both be enabled");
    }

    if kind == ModeKind::StatelessPerSession && config.storage.is_some() {
        problems.push("stateless-per-session mode must not configure storage");
    }

    if kind != ModeKind::SingleUserStatic && config.static_credentials.is_some() {
        problems.push(format!(
            "static_credentials is only valid in single-user-static mode, not {}",
            kind
        ));
    }
}

fn resolve_static(config: &WardenConfig, problems: &mut Problems) -> Option<StaticSettings> {
    let resource_url = problems.require(
        non_empty(&config.resource.url),
        "single-user-static mode requires resource.url",
    );
    let Some(creds) = problems.require(
        config.static_credentials.as_ref(),
        "single-user-static mode requires static_credentials",
    ) else {
        return None;
    };

    let username = problems.require(
        non_empty(&creds.username),
        "single-user-static mode requires static_credentials.username",
    );
    let password_source = SecretSource::new(
        "static_credentials.password",
        creds.password_env.as_ref(),
        creds.password_file.as_ref(),
    );
    let password = problems.secret(password_source);
    let password = problems.require(
        password,
        "single-user-static mode requires static_credentials.password_env or password_file",
    );

    Some(StaticSettings {
        resource_url: resource_url?,
        username: username?,
        password: password?,
    })
}

fn resolve_oauth(
    config: &WardenConfig,
    kind: ModeKind,
    problems: &mut Problems,
) -> Option<OAuthSettings> {
    let oauth = &config.oauth;
    let issuer = problems.require(
        non_empty(&oauth.issuer),
        &format!("{} mode requires oauth.issuer", kind),
    );
    let audience = problems.require(
        non_empty(&oauth.audience),
        &format!("{} mode requires oauth.audience", kind),
    );
    let hmac_key = problems.secret(SecretSource::new(
        "oauth.hmac_key",
        oauth.hmac_key_env.as_ref(),
        oauth.hmac_key_file.as_ref(),
    ));
    let client_secret = problems.secret(SecretSource::new(
        "oauth.client_secret",
        oauth.client_secret_env.as_ref(),
        oauth.client_secret_file.as_ref(),
    ));

    let issuer = issuer?;
    let mut trusted_issuers = vec![issuer.clone()];
    for extra in &oauth.additional_issuers {
        if !trusted_issuers.contains(extra) {
            trusted_issuers.push(extra.clone());
        }
    }

    Some(OAuthSettings {
        issuer,
        trusted_issuers,
        audience: audience?,
        resource_url: non_empty(&config.resource.url),
        admin_subjects: oauth.admin_subjects.clone(),
        scopes_supported: oauth.scopes_supported.clone(),
        hmac_key,
        endpoints: oauth.endpoints.clone(),
        client_id: non_empty(&oauth.client_id),
        client_secret,
    })
}

fn resolve_exchange(config: &WardenConfig, problems: &mut Problems) -> Option<ExchangeSettings> {
    let oauth = &config.oauth;
    let client_id = problems.require(
        non_empty(&oauth.client_id),
        "oauth-token-exchange mode requires oauth.client_id",
    );
    let source = SecretSource::new(
        "oauth.client_secret",
        oauth.client_secret_env.as_ref(),
        oauth.client_secret_file.as_ref(),
    );
    // Resolution errors were already reported by resolve_oauth.
    let client_secret = problems.require(
        source.resolve().ok().flatten(),
        "oauth-token-exchange mode requires oauth.client_secret_env or client_secret_file",
    );
    let resource_audience = problems.require(
        non_empty(&oauth.resource_audience),
        "oauth-token-exchange mode requires oauth.resource_audience",
    );

    Some(ExchangeSettings {
        client_id: client_id?,
        client_secret: client_secret?,
        resource_audience: resource_audience?,
    })
}

fn resolve_background(
    config: &WardenConfig,
    kind: ModeKind,
    problems: &mut Problems,
) -> Option<BackgroundSettings> {
    let client_id = if kind == ModeKind::OAuthTokenExchange {
        // Reported once by resolve_exchange.
        non_empty(&config.oauth.client_id)
    } else {
        problems.require(
            non_empty(&config.oauth.client_id),
            &format!("{} mode requires oauth.client_id", kind),
        )
    };
    let client_secret = SecretSource::new(
        "oauth.client_secret",
        config.oauth.client_secret_env.as_ref(),
        config.oauth.client_secret_file.as_ref(),
    )
    .resolve()
    .ok()
    .flatten();

    let Some(storage) = problems.require(
        config.storage.as_ref(),
        &format!("{} mode requires a storage section", kind),
    ) else {
        return None;
    };

    let storage_path = storage.path.clone();
    if storage.backend == StorageBackend::Sqlite && storage_path.is_none() {
        problems.push(format!("{} mode requires storage.path", kind));
    }

    let source = SecretSource::new(
        "storage.encryption_key",
        storage.encryption_key_env.as_ref(),
        storage.encryption_key_file.as_ref(),
    );
    let encoded = problems.secret(source);
    let encoded = problems.require(
        encoded,
        &format!(
            "{} mode requires storage.encryption_key_env or encryption_key_file",
            kind
        ),
    );
    let encryption_key = match encoded.map(|e| EncryptionKey::from_base64(e.expose())) {
        Some(Ok(key)) => Some(key),
        Some(Err(reason)) => {
            problems.push(format!("storage.encryption_key is invalid: {}", reason));
            None
        }
        None => None,
    };

    if storage.backend == StorageBackend::Sqlite && storage_path.is_none() {
        return None;
    }

    Some(BackgroundSettings {
        client_id: client_id?,
        client_secret,
        backend: storage.backend,
        storage_path,
        encryption_key: encryption_key?,
    })
}
