//! OAuth / identity-provider configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identity-provider settings shared by every OAuth-based mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Issuer URL of the identity provider. Discovery metadata is fetched
    /// from `{issuer}/.well-known/openid-configuration`.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Further issuers whose signed tokens are accepted.
    #[serde(default)]
    pub additional_issuers: Vec<String>,

    /// This component's own audience identifier.
    #[serde(default)]
    pub audience: Option<String>,

    /// Audience requested for tokens presented to the resource service.
    #[serde(default)]
    pub resource_audience: Option<String>,

    /// Use RFC 8693 token exchange for per-request credentials.
    #[serde(default)]
    pub token_exchange: bool,

    /// OAuth client id used for exchange, refresh and introspection.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Environment variable containing the client secret.
    #[serde(default)]
    pub client_secret_env: Option<String>,

    /// Path to a file containing the client secret.
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,

    /// Environment variable containing a static HMAC verification key.
    #[serde(default)]
    pub hmac_key_env: Option<String>,

    /// Path to a file containing a static HMAC verification key.
    #[serde(default)]
    pub hmac_key_file: Option<PathBuf>,

    /// Subjects allowed subject-match-only validation.
    #[serde(default)]
    pub admin_subjects: Vec<String>,

    /// Scopes advertised in protected-resource metadata, in addition to
    /// those required by registered capabilities.
    #[serde(default)]
    pub scopes_supported: Vec<String>,

    /// Explicit endpoint overrides. Discovery fills in the rest.
    #[serde(default)]
    pub endpoints: EndpointOverrides,
}

/// Endpoint URLs that take precedence over discovered values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOverrides {
    #[serde(default)]
    pub jwks_uri: Option<String>,

    #[serde(default)]
    pub token_endpoint: Option<String>,

    #[serde(default)]
    pub introspection_endpoint: Option<String>,

    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}
