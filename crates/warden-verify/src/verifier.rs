//! The unified token verifier.
//!
//! Verification is a two-step strategy:
//!
//! 1. A token that parses as a compact JWS is verified locally against the
//!    issuer's keys. Every outcome of this step is conclusive.
//! 2. Only a token that is not a compact JWS (an opaque reference token) is
//!    sent to the identity provider: RFC 7662 introspection when an
//!    introspection endpoint is known, otherwise userinfo.
//!
//! Audience policy is applied after either step, and again on every cache hit.

use crate::audience::AudienceRequirement;
use crate::cache::VerificationCache;
use crate::claims::RawClaims;
use crate::error::VerifyError;
use crate::keys::KeyStore;
use crate::remote::{ClientCredentials, HttpIdentityProvider, IdentityProvider};
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, Header, Validation};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use warden_core::config::VerifierConfig;
use warden_core::{OAuthSettings, ScopeSet, TokenFormat, VerifiedClaims};

/// How a presented token will be verified.
#[derive(Debug)]
enum Inspection {
    Signed(Header),
    Opaque,
}

fn inspect(token: &str) -> Inspection {
    if token.split('.').count() != 3 {
        return Inspection::Opaque;
    }
    match jsonwebtoken::decode_header(token) {
        Ok(header) => Inspection::Signed(header),
        Err(_) => Inspection::Opaque,
    }
}

/// Verifies inbound bearer tokens.
pub struct TokenVerifier {
    primary_issuer: String,
    trusted_issuers: Vec<String>,
    admin_subjects: HashSet<String>,
    client: Option<ClientCredentials>,
    leeway_secs: u64,
    provider: Arc<dyn IdentityProvider>,
    keys: KeyStore,
    cache: VerificationCache,
    vocabulary: RwLock<ScopeSet>,
}

impl TokenVerifier {
    /// Build a verifier that talks to the identity provider over HTTPS.
    pub fn from_settings(
        settings: &OAuthSettings,
        tuning: &VerifierConfig,
    ) -> Result<Self, VerifyError> {
        let provider = Arc::new(HttpIdentityProvider::new(tuning.http_timeout())?);
        Ok(Self::new(settings, tuning, provider))
    }

    pub fn new(
        settings: &OAuthSettings,
        tuning: &VerifierConfig,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        let keys = KeyStore::new(
            provider.clone(),
            settings.issuer.clone(),
            settings.endpoints.clone(),
            settings.hmac_key.clone(),
            tuning.jwks_min_refresh(),
        );
        let client = settings.client_id.as_ref().map(|client_id| ClientCredentials {
            client_id: client_id.clone(),
            client_secret: settings.client_secret.clone(),
        });

        Self {
            primary_issuer: settings.issuer.clone(),
            trusted_issuers: settings.trusted_issuers.clone(),
            admin_subjects: settings.admin_subjects.iter().cloned().collect(),
            client,
            leeway_secs: tuning.leeway_secs,
            provider,
            keys,
            cache: VerificationCache::new(tuning.cache_ttl(), tuning.cache_capacity),
            vocabulary: RwLock::new(settings.scopes_supported.iter().cloned().collect()),
        }
    }

    /// Extend the set of known scopes used to detect truncated scope claims.
    pub fn extend_vocabulary(&self, scopes: &ScopeSet) {
        let mut vocabulary = self.vocabulary.write().unwrap_or_else(|e| e.into_inner());
        vocabulary.extend(scopes.iter());
    }

    fn vocabulary(&self) -> ScopeSet {
        self.vocabulary
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn cache(&self) -> &VerificationCache {
        &self.cache
    }

    /// Verify `token` and apply the audience requirement.
    pub async fn verify(
        &self,
        token: &str,
        required: &AudienceRequirement,
    ) -> Result<VerifiedClaims, VerifyError> {
        if let Some(claims) = self.cache.get(token) {
            tracing::debug!(subject = %claims.subject, "Verification cache hit");
            return self.check_audience(claims, required);
        }

        let claims = match inspect(token) {
            Inspection::Signed(header) => self.verify_signed(token, header).await?,
            Inspection::Opaque => self.verify_remote(token).await?,
        };

        self.cache.insert(token, &claims);
        self.check_audience(claims, required)
    }

    async fn verify_signed(&self, token: &str, header: Header) -> Result<VerifiedClaims, VerifyError> {
        let issuer = peek_issuer(token)?;
        if !self.trusted_issuers.iter().any(|t| *t == issuer) {
            return Err(VerifyError::UnknownIssuer(issuer));
        }

        let key = self.keys.decoding_key(&issuer, &header).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_required_spec_claims(&["exp"]);
        validation.validate_aud = false;
        validation.leeway = self.leeway_secs;
        validation.set_issuer(&[issuer.as_str()]);

        let data = jsonwebtoken::decode::<RawClaims>(token, &key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::ExpiredToken,
                ErrorKind::MissingRequiredClaim(claim) if claim == "exp" => {
                    VerifyError::MissingClaim("exp")
                }
                ErrorKind::InvalidIssuer => VerifyError::UnknownIssuer(issuer.clone()),
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidKeyFormat
                | ErrorKind::InvalidRsaKey(_)
                | ErrorKind::InvalidEcdsaKey => VerifyError::InvalidSignature(e.to_string()),
                _ => VerifyError::Malformed(e.to_string()),
            }
        })?;

        data.claims
            .into_verified(&issuer, TokenFormat::Signed, &self.vocabulary())
    }

    async fn verify_remote(&self, token: &str) -> Result<VerifiedClaims, VerifyError> {
        let meta = self.keys.metadata(&self.primary_issuer).await?;

        let raw = if let Some(endpoint) = &meta.introspection_endpoint {
            let raw = self
                .provider
                .introspect(endpoint, token, self.client.as_ref())
                .await?;
            if raw.active != Some(true) {
                return Err(VerifyError::InactiveToken);
            }
            raw
        } else if let Some(endpoint) = &meta.userinfo_endpoint {
            let mut raw = self.provider.userinfo(endpoint, token).await?;
            // Userinfo proves identity, not authority.
            raw.scope = None;
            raw
        } else {
            return Err(VerifyError::Malformed(
                "opaque token and no introspection or userinfo endpoint".to_string(),
            ));
        };

        if let Some(iss) = &raw.iss {
            if !self.trusted_issuers.contains(iss) {
                return Err(VerifyError::UnknownIssuer(iss.clone()));
            }
        }
        if let Some(exp) = raw.exp {
            if exp + self.leeway_secs as i64 <= Utc::now().timestamp() {
                return Err(VerifyError::ExpiredToken);
            }
        }

        raw.into_verified(&self.primary_issuer, TokenFormat::Opaque, &self.vocabulary())
    }

    fn check_audience(
        &self,
        claims: VerifiedClaims,
        required: &AudienceRequirement,
    ) -> Result<VerifiedClaims, VerifyError> {
        if required.is_satisfied_by(&claims.audience) {
            return Ok(claims);
        }

        if self.admin_subjects.contains(claims.subject.as_str()) {
            tracing::warn!(
                subject = %claims.subject,
                expected = required.expected(),
                audience = ?claims.audience,
                "Accepting token by subject match only"
            );
            return Ok(claims);
        }

        Err(VerifyError::AudienceMismatch {
            expected: required.expected().to_string(),
            actual: claims.audience,
        })
    }
}

/// Read `iss` without verifying the signature, to select the key set.
fn peek_issuer(token: &str) -> Result<String, VerifyError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let data = jsonwebtoken::decode::<RawClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| VerifyError::Malformed(e.to_string()))?;
    data.claims.iss.ok_or(VerifyError::MissingClaim("iss"))
}
