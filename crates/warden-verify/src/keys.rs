//! Per-issuer verification keys.
//!
//! Each trusted issuer gets its own cached provider metadata and JWKS. A
//! `kid` that is not in the cached set triggers at most one refetch per
//! `min_refresh` interval, so a stream of tokens with bogus key ids cannot
//! hammer the identity provider.

use crate::error::VerifyError;
use crate::remote::{IdentityProvider, ProviderMetadata};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Header};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use warden_core::SecretString;
use warden_core::config::EndpointOverrides;

#[derive(Debug, Default)]
struct IssuerState {
    metadata: Option<ProviderMetadata>,
    jwks: Option<JwkSet>,
    fetched_at: Option<Instant>,
}

/// Key material for every trusted issuer.
pub struct KeyStore {
    provider: Arc<dyn IdentityProvider>,
    primary_issuer: String,
    overrides: EndpointOverrides,
    hmac_key: Option<SecretString>,
    min_refresh: Duration,
    issuers: RwLock<HashMap<String, IssuerState>>,
}

impl KeyStore {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        primary_issuer: impl Into<String>,
        overrides: EndpointOverrides,
        hmac_key: Option<SecretString>,
        min_refresh: Duration,
    ) -> Self {
        Self {
            provider,
            primary_issuer: primary_issuer.into(),
            overrides,
            hmac_key,
            min_refresh,
            issuers: RwLock::new(HashMap::new()),
        }
    }

    /// Provider metadata for `issuer`, discovered on first use.
    ///
    /// Endpoint overrides apply to the primary issuer only.
    pub async fn metadata(&self, issuer: &str) -> Result<ProviderMetadata, VerifyError> {
        if let Some(meta) = self
            .issuers
            .read()
            .await
            .get(issuer)
            .and_then(|s| s.metadata.clone())
        {
            return Ok(meta);
        }

        let is_primary = issuer == self.primary_issuer;
        let overridden = ProviderMetadata::from_overrides(&self.overrides);
        let meta = if is_primary && overridden.is_complete() {
            overridden
        } else {
            let discovered = self.provider.discover(issuer).await?;
            if is_primary {
                discovered.with_overrides(&self.overrides)
            } else {
                discovered
            }
        };

        let mut issuers = self.issuers.write().await;
        issuers.entry(issuer.to_string()).or_default().metadata = Some(meta.clone());
        Ok(meta)
    }

    /// Key that should verify a token from `issuer` with `header`.
    ///
    /// The static HMAC key belongs to the primary issuer only.
    pub async fn decoding_key(
        &self,
        issuer: &str,
        header: &Header,
    ) -> Result<DecodingKey, VerifyError> {
        if matches!(header.alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return match &self.hmac_key {
                Some(key) if issuer == self.primary_issuer => {
                    Ok(DecodingKey::from_secret(key.expose().as_bytes()))
                }
                _ => Err(VerifyError::InvalidSignature(format!(
                    "HMAC-signed token but no shared key is configured for {}",
                    issuer
                ))),
            };
        }

        if let Some(jwk) = self.cached_jwk(issuer, header.kid.as_deref()).await {
            return decoding_key_from_jwk(&jwk);
        }

        if !self.refresh_jwks(issuer).await? {
            tracing::debug!(issuer, kid = ?header.kid, "JWKS refetch suppressed by rate limit");
        }

        match self.cached_jwk(issuer, header.kid.as_deref()).await {
            Some(jwk) => decoding_key_from_jwk(&jwk),
            None => Err(VerifyError::InvalidSignature(format!(
                "no key with id {:?} for issuer {}",
                header.kid, issuer
            ))),
        }
    }

    async fn cached_jwk(&self, issuer: &str, kid: Option<&str>) -> Option<Jwk> {
        let issuers = self.issuers.read().await;
        let jwks = issuers.get(issuer)?.jwks.as_ref()?;
        match kid {
            Some(kid) => jwks.find(kid).cloned(),
            // Without a kid the only unambiguous choice is a single-key set.
            None if jwks.keys.len() == 1 => jwks.keys.first().cloned(),
            None => None,
        }
    }

    /// Refetch the JWKS unless it was fetched within `min_refresh`.
    /// Returns whether a fetch happened.
    async fn refresh_jwks(&self, issuer: &str) -> Result<bool, VerifyError> {
        {
            let issuers = self.issuers.read().await;
            if let Some(fetched_at) = issuers.get(issuer).and_then(|s| s.fetched_at) {
                if fetched_at.elapsed() < self.min_refresh {
                    return Ok(false);
                }
            }
        }

        let meta = self.metadata(issuer).await?;
        let jwks_uri = meta.jwks_uri.ok_or_else(|| {
            VerifyError::InvalidSignature(format!("issuer {} publishes no jwks_uri", issuer))
        })?;
        let jwks = self.provider.fetch_jwks(&jwks_uri).await?;
        tracing::debug!(issuer, keys = jwks.keys.len(), "Loaded JWKS");

        let mut issuers = self.issuers.write().await;
        let state = issuers.entry(issuer.to_string()).or_default();
        state.jwks = Some(jwks);
        state.fetched_at = Some(Instant::now());
        Ok(true)
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey, VerifyError> {
    DecodingKey::from_jwk(jwk)
        .map_err(|e| VerifyError::InvalidSignature(format!("unusable key in JWKS: {}", e)))
}
