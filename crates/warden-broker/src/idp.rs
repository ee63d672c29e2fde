//! Identity-provider token endpoint client.
//!
//! Two grants are used: the refresh-token grant (RFC 6749 §6) for background
//! tokens, and token exchange (RFC 8693) for session delegation. Error
//! responses are mapped onto [`IdpError`] so callers can tell a void grant
//! from a policy refusal from a passing outage.

use crate::error::IdpError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use warden_core::{AccessToken, PrincipalId, ScopeSet, SecretString, TokenFormat};

pub const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: SecretString,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    #[serde(default)]
    pub expires_in: Option<u64>,

    #[serde(default)]
    pub refresh_token: Option<SecretString>,

    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub issued_token_type: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Scopes actually granted. An omitted `scope` means the request was
    /// granted as asked.
    pub fn granted_scopes(&self, requested: &ScopeSet) -> ScopeSet {
        match &self.scope {
            Some(scope) => ScopeSet::parse(scope),
            None => requested.clone(),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
    }

    /// Split into the access token and the (possibly rotated) refresh token.
    pub fn into_access_token(
        self,
        audience: Vec<String>,
        requested: &ScopeSet,
        subject: Option<PrincipalId>,
    ) -> (AccessToken, Option<SecretString>) {
        let scopes = self.granted_scopes(requested);
        let expires_at = self.expires_at();
        let format = if self.access_token.expose().split('.').count() == 3 {
            TokenFormat::Signed
        } else {
            TokenFormat::Opaque
        };

        let token = AccessToken {
            value: self.access_token,
            audience,
            scopes,
            expires_at,
            issuer: None,
            subject,
            format,
        };
        (token, self.refresh_token)
    }
}

/// Grants the broker performs against the identity provider.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// RFC 8693 exchange of `subject_token` for a token aimed at `audience`.
    async fn exchange(
        &self,
        subject_token: &SecretString,
        audience: &str,
        scopes: &ScopeSet,
    ) -> Result<TokenResponse, IdpError>;

    /// Refresh-token grant, narrowed to `scopes`.
    async fn refresh(
        &self,
        refresh_token: &SecretString,
        scopes: &ScopeSet,
    ) -> Result<TokenResponse, IdpError>;
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    token_endpoint: Option<String>,
}

/// [`TokenEndpoint`] over HTTPS with client authentication.
///
/// The endpoint URL comes from configuration when set, otherwise from the
/// issuer's discovery document on first use.
pub struct HttpTokenEndpoint {
    http_client: reqwest::Client,
    issuer: String,
    configured_endpoint: Option<String>,
    discovered_endpoint: OnceCell<String>,
    client_id: String,
    client_secret: Option<SecretString>,
}

impl HttpTokenEndpoint {
    pub fn new(
        issuer: impl Into<String>,
        token_endpoint: Option<String>,
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, IdpError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IdpError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            issuer: issuer.into(),
            configured_endpoint: token_endpoint,
            discovered_endpoint: OnceCell::new(),
            client_id: client_id.into(),
            client_secret,
        })
    }

    async fn endpoint(&self) -> Result<&str, IdpError> {
        if let Some(endpoint) = &self.configured_endpoint {
            return Ok(endpoint.as_str());
        }
        self.discovered_endpoint
            .get_or_try_init(|| self.discover())
            .await
            .map(String::as_str)
    }

    async fn discover(&self) -> Result<String, IdpError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            self.issuer.trim_end_matches('/')
        );
        tracing::debug!(issuer = %self.issuer, "Discovering token endpoint");

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IdpError::Unavailable(format!("GET {} returned {}", url, status)));
        }
        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| IdpError::Protocol(format!("invalid discovery document: {}", e)))?;
        document
            .token_endpoint
            .ok_or_else(|| IdpError::Protocol(format!("{} advertises no token_endpoint", self.issuer)))
    }

    async fn post_form<'a>(
        &'a self,
        grant: &str,
        mut form: Vec<(&'a str, &'a str)>,
    ) -> Result<TokenResponse, IdpError> {
        let endpoint = self.endpoint().await?;

        let mut request = self.http_client.post(endpoint);
        match &self.client_secret {
            Some(secret) => request = request.basic_auth(&self.client_id, Some(secret.expose())),
            None => form.push(("client_id", self.client_id.as_str())),
        }

        let response = request.form(&form).send().await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenResponse>()
                .await
                .map_err(|e| IdpError::Protocol(format!("invalid token response: {}", e)));
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(
                    grant,
                    status = status.as_u16(),
                    error = %e,
                    "Failed to read token endpoint error body"
                );
                String::new()
            }
        };
        let err = classify_error(status, &body);
        tracing::debug!(grant, status = status.as_u16(), error = %err, "Token endpoint refused request");
        Err(err)
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange(
        &self,
        subject_token: &SecretString,
        audience: &str,
        scopes: &ScopeSet,
    ) -> Result<TokenResponse, IdpError> {
        let scope = scopes.to_scope_string();
        let mut form = vec![
            ("grant_type", TOKEN_EXCHANGE_GRANT),
            ("subject_token", subject_token.expose()),
            ("subject_token_type", ACCESS_TOKEN_TYPE),
            ("requested_token_type", ACCESS_TOKEN_TYPE),
            ("audience", audience),
        ];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }
        self.post_form("token_exchange", form).await
    }

    async fn refresh(
        &self,
        refresh_token: &SecretString,
        scopes: &ScopeSet,
    ) -> Result<TokenResponse, IdpError> {
        let scope = scopes.to_scope_string();
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose()),
        ];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }
        self.post_form("refresh_token", form).await
    }
}

impl std::fmt::Debug for HttpTokenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenEndpoint")
            .field("issuer", &self.issuer)
            .field("configured_endpoint", &self.configured_endpoint)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Map a non-success token endpoint response to an [`IdpError`].
pub fn classify_error(status: StatusCode, body: &str) -> IdpError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return IdpError::Unavailable(format!("token endpoint returned {}", status));
    }

    let Ok(parsed) = serde_json::from_str::<OAuthErrorBody>(body) else {
        return IdpError::Denied {
            code: status.as_u16().to_string(),
            description: body.chars().take(200).collect(),
        };
    };

    let description = parsed.error_description.unwrap_or_default();
    match parsed.error.as_str() {
        "invalid_grant" => IdpError::InvalidGrant(description),
        "invalid_scope" | "invalid_target" => IdpError::ScopeNotGrantable(description),
        "temporarily_unavailable" => IdpError::Unavailable(description),
        _ => IdpError::Denied {
            code: parsed.error,
            description,
        },
    }
}
