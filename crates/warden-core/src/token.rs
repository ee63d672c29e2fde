//! Token and claim types produced by verification and the broker.

use crate::principal::PrincipalId;
use crate::scope::ScopeSet;
use crate::secret::SecretString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a token was presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenFormat {
    /// Compact JWS, verified locally against the issuer's keys.
    Signed,
    /// Opaque reference token, verified by the identity provider.
    Opaque,
}

/// Claims extracted from a successfully verified inbound bearer token.
///
/// This is what the authorizer sees. Scopes are only ever those the token
/// actually carried; a missing or damaged `scope` claim yields an empty set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    /// Subject (`sub`).
    pub subject: PrincipalId,

    /// Issuer (`iss`).
    pub issuer: String,

    /// Audience values (`aud`), normalized to a list.
    #[serde(default)]
    pub audience: Vec<String>,

    /// Granted scopes.
    #[serde(default)]
    pub scopes: ScopeSet,

    /// Expiry (`exp`).
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Authorized party (`azp`) or `client_id`.
    #[serde(default)]
    pub authorized_party: Option<String>,

    /// Whether the token was signed or opaque.
    pub format: TokenFormat,
}

impl VerifiedClaims {
    /// Whether the token granted `scope`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Whether `value` is one of the audience entries.
    pub fn audience_contains(&self, value: &str) -> bool {
        self.audience.iter().any(|a| a == value)
    }

    /// Whether the token is past its `exp`.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Utc::now() >= exp)
    }
}

/// A bearer credential issued by the identity provider.
///
/// On the session path these are never persisted; on the background path
/// only the refresh secret that produced them is.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: SecretString,
    pub audience: Vec<String>,
    pub scopes: ScopeSet,
    pub expires_at: Option<DateTime<Utc>>,
    pub issuer: Option<String>,
    pub subject: Option<PrincipalId>,
    pub format: TokenFormat,
}

impl AccessToken {
    /// `Authorization` header value for this token.
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.value.expose())
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Utc::now() >= exp)
    }
}
