//! The token broker service.
//!
//! [`TokenBroker`] is built once from the resolved [`DeploymentMode`] and
//! owns both acquisition paths:
//!
//! - **Session**: the caller's inbound credential is turned into the
//!   outbound one for this request only ([`TokenBroker::outbound_credential`],
//!   [`TokenBroker::get_session_token`]). Nothing on this path is stored.
//! - **Background**: a persisted, rotating refresh grant yields access
//!   tokens for unattended work ([`TokenBroker::get_background_token`]).

use crate::crypto::TokenCipher;
use crate::error::{BrokerError, StoreError};
use crate::exchange::{DelegatedToken, TokenExchanger};
use crate::idp::{HttpTokenEndpoint, TokenEndpoint};
use crate::lock::LocalLockManager;
use crate::refresh::BackgroundRefresher;
use crate::retry::RetryPolicy;
use crate::store::{MemoryBackend, RecordBackend, RefreshTokenStore, SqliteBackend};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;
use warden_core::config::{BrokerConfig, StorageBackend};
use warden_core::{
    AccessToken, BackgroundSettings, DeploymentMode, PrincipalId, ScopeSet, SecretString,
};

/// The credential a caller presented to us.
#[derive(Debug, Clone)]
pub enum InboundCredential {
    Bearer(SecretString),
    Basic {
        username: String,
        password: SecretString,
    },
}

impl InboundCredential {
    /// Parse an `Authorization` header value. Returns `None` for unknown
    /// schemes or malformed basic credentials.
    pub fn from_authorization_header(value: &str) -> Option<Self> {
        let (scheme, rest) = value.trim().split_once(' ')?;
        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }

        if scheme.eq_ignore_ascii_case("bearer") {
            return Some(Self::Bearer(SecretString::new(rest)));
        }
        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = STANDARD.decode(rest).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, password) = decoded.split_once(':')?;
            return Some(Self::Basic {
                username: username.to_string(),
                password: SecretString::new(password),
            });
        }
        None
    }
}

/// The credential to present to the resource service.
#[derive(Debug)]
pub enum OutboundCredential {
    Basic {
        username: String,
        password: SecretString,
    },
    Bearer(SecretString),
    Delegated(DelegatedToken),
}

impl OutboundCredential {
    /// How the credential was obtained, without exposing it.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundCredential::Basic { .. } => "basic",
            OutboundCredential::Bearer(_) => "forwarded",
            OutboundCredential::Delegated(_) => "delegated",
        }
    }

    pub fn into_authorization_header(self) -> String {
        match self {
            OutboundCredential::Basic { username, password } => {
                let pair = format!("{}:{}", username, password.expose());
                format!("Basic {}", STANDARD.encode(pair))
            }
            OutboundCredential::Bearer(token) => format!("Bearer {}", token.expose()),
            OutboundCredential::Delegated(token) => token.into_bearer_header(),
        }
    }
}

/// How per-request outbound credentials are chosen. Fixed at startup.
#[derive(Debug, Clone)]
pub enum OutboundStrategy {
    /// One configured service account for every call.
    StaticBasic {
        username: String,
        password: SecretString,
    },
    /// The caller's own basic credentials.
    PassthroughBasic,
    /// The inbound bearer token, whose audience already covers the resource.
    ForwardBearer,
    /// RFC 8693 exchange per request.
    Exchange,
}

impl OutboundStrategy {
    pub fn for_mode(mode: &DeploymentMode) -> Self {
        match mode {
            DeploymentMode::SingleUserStatic(settings) => OutboundStrategy::StaticBasic {
                username: settings.username.clone(),
                password: settings.password.clone(),
            },
            DeploymentMode::MultiUserPassthrough(_) => OutboundStrategy::PassthroughBasic,
            DeploymentMode::OAuthSharedAudience { .. } | DeploymentMode::StatelessPerSession(_) => {
                OutboundStrategy::ForwardBearer
            }
            DeploymentMode::OAuthTokenExchange { .. } => OutboundStrategy::Exchange,
        }
    }
}

pub struct TokenBroker {
    strategy: OutboundStrategy,
    exchanger: Option<TokenExchanger>,
    refresher: Option<BackgroundRefresher>,
}

impl TokenBroker {
    pub fn new(strategy: OutboundStrategy) -> Self {
        Self {
            strategy,
            exchanger: None,
            refresher: None,
        }
    }

    pub fn with_exchanger(mut self, exchanger: TokenExchanger) -> Self {
        self.exchanger = Some(exchanger);
        self
    }

    pub fn with_refresher(mut self, refresher: BackgroundRefresher) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Build the broker for `mode`, talking to the identity provider over HTTP.
    pub async fn from_mode(mode: &DeploymentMode, config: &BrokerConfig) -> Result<Self, BrokerError> {
        let endpoint = match (mode.oauth(), client_credentials(mode)) {
            (Some(oauth), Some((client_id, client_secret))) => {
                let endpoint = HttpTokenEndpoint::new(
                    &oauth.issuer,
                    oauth.endpoints.token_endpoint.clone(),
                    client_id,
                    client_secret,
                    config.http_timeout(),
                )
                .map_err(|e| BrokerError::IdpUnavailable(e.to_string()))?;
                Some(Arc::new(endpoint) as Arc<dyn TokenEndpoint>)
            }
            _ => None,
        };
        Self::from_mode_with_endpoint(mode, config, endpoint).await
    }

    /// Build the broker for `mode` with a given token endpoint.
    pub async fn from_mode_with_endpoint(
        mode: &DeploymentMode,
        config: &BrokerConfig,
        endpoint: Option<Arc<dyn TokenEndpoint>>,
    ) -> Result<Self, BrokerError> {
        let retry = RetryPolicy::from_config(&config.retry);
        let mut broker = Self::new(OutboundStrategy::for_mode(mode));

        let Some(endpoint) = endpoint else {
            return Ok(broker);
        };

        if let Some(exchange) = mode.exchange() {
            broker = broker.with_exchanger(TokenExchanger::new(
                endpoint.clone(),
                &exchange.resource_audience,
                retry.clone(),
            ));
        }

        if let Some(background) = mode.background() {
            let store = open_store(background).await?;
            let locks = Arc::new(LocalLockManager::new(config.lock_timeout()));
            let mut refresher = BackgroundRefresher::new(store, locks, endpoint, retry);
            if let Some(exchange) = mode.exchange() {
                refresher = refresher.with_audience(&exchange.resource_audience);
            }
            broker = broker.with_refresher(refresher);
        }

        Ok(broker)
    }

    pub fn strategy(&self) -> &OutboundStrategy {
        &self.strategy
    }

    pub fn supports_background(&self) -> bool {
        self.refresher.is_some()
    }

    /// The refresh token store, in background-capable modes.
    pub fn store(&self) -> Option<&RefreshTokenStore> {
        self.refresher.as_ref().map(BackgroundRefresher::store)
    }

    /// Exchange the live caller's token for a single-use delegated token.
    pub async fn get_session_token(
        &self,
        inbound_token: &SecretString,
        required_scopes: &ScopeSet,
    ) -> Result<DelegatedToken, BrokerError> {
        let exchanger = self
            .exchanger
            .as_ref()
            .ok_or(BrokerError::NotSupported("session token exchange"))?;
        exchanger.exchange(inbound_token, required_scopes).await
    }

    /// Access token for unattended work on `principal`'s behalf.
    pub async fn get_background_token(
        &self,
        principal: &PrincipalId,
        required_scopes: &ScopeSet,
    ) -> Result<AccessToken, BrokerError> {
        self.refresher()?
            .get_background_token(principal, required_scopes)
            .await
    }

    /// Record the refresh grant obtained during out-of-band consent.
    pub async fn provision(
        &self,
        principal: &PrincipalId,
        refresh_secret: &SecretString,
        granted_scopes: &ScopeSet,
    ) -> Result<u64, BrokerError> {
        self.refresher()?
            .provision(principal, refresh_secret, granted_scopes)
            .await
    }

    pub async fn revoke(&self, principal: &PrincipalId) -> Result<bool, BrokerError> {
        self.refresher()?.revoke(principal).await
    }

    /// Credential to present downstream for this request.
    ///
    /// `inbound` is what the caller presented, if anything. Only the
    /// static strategy works without it.
    pub async fn outbound_credential(
        &self,
        inbound: Option<&InboundCredential>,
        required_scopes: &ScopeSet,
    ) -> Result<OutboundCredential, BrokerError> {
        match (&self.strategy, inbound) {
            (OutboundStrategy::StaticBasic { username, password }, _) => Ok(OutboundCredential::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            (
                OutboundStrategy::PassthroughBasic,
                Some(InboundCredential::Basic { username, password }),
            ) => Ok(OutboundCredential::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            (OutboundStrategy::PassthroughBasic, _) => Err(BrokerError::InboundCredential(
                "basic credentials required for pass-through",
            )),
            (OutboundStrategy::ForwardBearer, Some(InboundCredential::Bearer(token))) => {
                Ok(OutboundCredential::Bearer(token.clone()))
            }
            (OutboundStrategy::Exchange, Some(InboundCredential::Bearer(token))) => Ok(
                OutboundCredential::Delegated(self.get_session_token(token, required_scopes).await?),
            ),
            (_, _) => Err(BrokerError::InboundCredential("bearer token required")),
        }
    }

    /// Release storage. The broker should not be used afterwards.
    pub async fn shutdown(&self) {
        if let Some(store) = self.store() {
            store.close().await;
        }
        tracing::info!("Token broker shut down");
    }

    fn refresher(&self) -> Result<&BackgroundRefresher, BrokerError> {
        self.refresher
            .as_ref()
            .ok_or(BrokerError::NotSupported("background tokens"))
    }
}

fn client_credentials(mode: &DeploymentMode) -> Option<(String, Option<SecretString>)> {
    if let Some(exchange) = mode.exchange() {
        return Some((exchange.client_id.clone(), Some(exchange.client_secret.clone())));
    }
    mode.background()
        .map(|background| (background.client_id.clone(), background.client_secret.clone()))
}

async fn open_store(background: &BackgroundSettings) -> Result<RefreshTokenStore, StoreError> {
    let backend: Arc<dyn RecordBackend> = match (background.backend, &background.storage_path) {
        (StorageBackend::Memory, _) => Arc::new(MemoryBackend::new()),
        (StorageBackend::Sqlite, Some(path)) => Arc::new(SqliteBackend::open(path).await?),
        (StorageBackend::Sqlite, None) => {
            return Err(StoreError::Misconfigured("sqlite backend requires storage.path".into()));
        }
    };
    tracing::info!(
        backend = ?background.backend,
        path = ?background.storage_path,
        "Opened refresh token store"
    );
    Ok(RefreshTokenStore::new(
        backend,
        TokenCipher::new(&background.encryption_key),
    ))
}
