//! Identity-provider calls made during verification.
//!
//! [`IdentityProvider`] is the seam between the verifier and the network.
//! [`HttpIdentityProvider`] is the production implementation; tests supply
//! their own.

use crate::claims::RawClaims;
use crate::error::VerifyError;
use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use warden_core::SecretString;
use warden_core::config::EndpointOverrides;

/// OpenID Provider metadata (the subset Warden uses).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub jwks_uri: Option<String>,

    #[serde(default)]
    pub token_endpoint: Option<String>,

    #[serde(default)]
    pub introspection_endpoint: Option<String>,

    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

impl ProviderMetadata {
    /// Metadata built from overrides alone.
    pub fn from_overrides(overrides: &EndpointOverrides) -> Self {
        Self {
            issuer: None,
            jwks_uri: overrides.jwks_uri.clone(),
            token_endpoint: overrides.token_endpoint.clone(),
            introspection_endpoint: overrides.introspection_endpoint.clone(),
            userinfo_endpoint: overrides.userinfo_endpoint.clone(),
        }
    }

    /// Apply explicit overrides on top of discovered values.
    pub fn with_overrides(mut self, overrides: &EndpointOverrides) -> Self {
        if let Some(v) = &overrides.jwks_uri {
            self.jwks_uri = Some(v.clone());
        }
        if let Some(v) = &overrides.token_endpoint {
            self.token_endpoint = Some(v.clone());
        }
        if let Some(v) = &overrides.introspection_endpoint {
            self.introspection_endpoint = Some(v.clone());
        }
        if let Some(v) = &overrides.userinfo_endpoint {
            self.userinfo_endpoint = Some(v.clone());
        }
        self
    }

    /// Whether overrides alone already name every endpoint verification needs.
    pub fn is_complete(&self) -> bool {
        self.jwks_uri.is_some()
            && (self.introspection_endpoint.is_some() || self.userinfo_endpoint.is_some())
    }
}

/// Client credentials presented to the introspection endpoint.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<SecretString>,
}

/// Network operations the verifier depends on.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch `{issuer}/.well-known/openid-configuration`.
    async fn discover(&self, issuer: &str) -> Result<ProviderMetadata, VerifyError>;

    /// Fetch a JSON Web Key Set.
    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JwkSet, VerifyError>;

    /// RFC 7662 token introspection.
    async fn introspect(
        &self,
        endpoint: &str,
        token: &str,
        client: Option<&ClientCredentials>,
    ) -> Result<RawClaims, VerifyError>;

    /// OIDC userinfo, authenticated with the token itself.
    async fn userinfo(&self, endpoint: &str, token: &str) -> Result<RawClaims, VerifyError>;
}

/// [`IdentityProvider`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    http_client: reqwest::Client,
}

impl HttpIdentityProvider {
    pub fn new(timeout: Duration) -> Result<Self, VerifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerifyError::IdpUnavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, VerifyError> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::IdpUnavailable(format!(
                "GET {} returned {}",
                url, status
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| VerifyError::IdpUnavailable(format!("invalid response from {}: {}", url, e)))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn discover(&self, issuer: &str) -> Result<ProviderMetadata, VerifyError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        tracing::debug!(issuer, "Fetching provider metadata");
        self.get_json(&url).await
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JwkSet, VerifyError> {
        tracing::debug!(jwks_uri, "Fetching JWKS");
        self.get_json(jwks_uri).await
    }

    async fn introspect(
        &self,
        endpoint: &str,
        token: &str,
        client: Option<&ClientCredentials>,
    ) -> Result<RawClaims, VerifyError> {
        let mut request = self
            .http_client
            .post(endpoint)
            .form(&[("token", token), ("token_type_hint", "access_token")]);
        if let Some(client) = client {
            request = request.basic_auth(
                &client.client_id,
                client.client_secret.as_ref().map(SecretString::expose),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(VerifyError::IdpUnavailable(format!(
                "introspection returned {}",
                status
            )));
        }
        if !status.is_success() {
            // Our own client credentials were refused; the caller's token is
            // not at fault but cannot be verified either.
            return Err(VerifyError::IdpUnavailable(format!(
                "introspection rejected client: {}",
                status
            )));
        }

        response
            .json::<RawClaims>()
            .await
            .map_err(|e| VerifyError::IdpUnavailable(format!("invalid introspection response: {}", e)))
    }

    async fn userinfo(&self, endpoint: &str, token: &str) -> Result<RawClaims, VerifyError> {
        let response = self.http_client.get(endpoint).bearer_auth(token).send().await?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(VerifyError::InactiveToken);
        }
        if !status.is_success() {
            return Err(VerifyError::IdpUnavailable(format!(
                "userinfo returned {}",
                status
            )));
        }

        response
            .json::<RawClaims>()
            .await
            .map_err(|e| VerifyError::IdpUnavailable(format!("invalid userinfo response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win() {
        let discovered = ProviderMetadata {
            issuer: Some("https://idp".into()),
            jwks_uri: Some("https://idp/jwks".into()),
            token_endpoint: Some("https://idp/token".into()),
            introspection_endpoint: None,
            userinfo_endpoint: Some("https://idp/userinfo".into()),
        };
        let overrides = EndpointOverrides {
            jwks_uri: Some("https://keys.internal/jwks".into()),
            introspection_endpoint: Some("https://idp/introspect".into()),
            ..Default::default()
        };

        let merged = discovered.with_overrides(&overrides);
        assert_eq!(merged.jwks_uri.as_deref(), Some("https://keys.internal/jwks"));
        assert_eq!(merged.token_endpoint.as_deref(), Some("https://idp/token"));
        assert_eq!(
            merged.introspection_endpoint.as_deref(),
            Some("https://idp/introspect")
        );
    }

    #[test]
    fn test_discovery_document_parses() {
        let doc = serde_json::json!({
            "issuer": "https://idp.example.com",
            "jwks_uri": "https://idp.example.com/keys",
            "token_endpoint": "https://idp.example.com/token",
            "response_types_supported": ["code"],
        });
        let meta: ProviderMetadata = serde_json::from_value(doc).unwrap();
        assert_eq!(meta.jwks_uri.as_deref(), Some("https://idp.example.com/keys"));
        assert!(meta.introspection_endpoint.is_none());
        assert!(!meta.is_complete());
    }
}
