//! Raw claim sets as they appear in JWTs and introspection responses.

use crate::error::VerifyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use warden_core::{PrincipalId, ScopeSet, TokenFormat, VerifiedClaims};

/// Audience claim value, which can be a single string or array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenAudience {
    Single(String),
    Multiple(Vec<String>),
}

impl TokenAudience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            TokenAudience::Single(s) => s == value,
            TokenAudience::Multiple(v) => v.iter().any(|s| s == value),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            TokenAudience::Single(s) => vec![s.clone()],
            TokenAudience::Multiple(v) => v.clone(),
        }
    }
}

/// Claims recognised in a token payload or an RFC 7662 response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<TokenAudience>,

    /// Expiration time (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Space-delimited scope string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Present in introspection responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl RawClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    /// Convert into [`VerifiedClaims`], extracting scopes against the known
    /// scope vocabulary.
    pub fn into_verified(
        self,
        fallback_issuer: &str,
        format: TokenFormat,
        vocabulary: &ScopeSet,
    ) -> Result<VerifiedClaims, VerifyError> {
        let subject = self
            .sub
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(VerifyError::MissingClaim("sub"))?;

        Ok(VerifiedClaims {
            subject: PrincipalId::new(subject),
            issuer: self.iss.clone().unwrap_or_else(|| fallback_issuer.to_string()),
            audience: self.aud.as_ref().map(TokenAudience::to_vec).unwrap_or_default(),
            scopes: extract_scopes(self.scope.as_deref(), vocabulary),
            expires_at: self.expires_at(),
            authorized_party: self.azp.or(self.client_id),
            format,
        })
    }
}

/// Parse a `scope` claim into the granted scope set.
///
/// A missing claim grants nothing. An entry that is a strict prefix of a
/// known scope, and not itself known, marks the claim as truncated; a
/// truncated claim grants nothing at all. Nothing is ever added.
pub fn extract_scopes(raw: Option<&str>, vocabulary: &ScopeSet) -> ScopeSet {
    let Some(raw) = raw else {
        return ScopeSet::new();
    };

    let truncated = raw.split_whitespace().find(|&entry| {
        !vocabulary.contains(entry)
            && vocabulary
                .iter()
                .any(|known| known.len() > entry.len() && known.starts_with(entry))
    });
    if let Some(fragment) = truncated {
        tracing::warn!(
            fragment,
            claim_len = raw.len(),
            "Truncated scope claim, granting no scopes"
        );
        return ScopeSet::new();
    }

    ScopeSet::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_audience_single_and_multiple() {
        let single: TokenAudience = serde_json::from_str(r#""mcp""#).unwrap();
        assert_eq!(single, TokenAudience::Single("mcp".into()));
        assert!(single.contains("mcp"));

        let multi: TokenAudience = serde_json::from_str(r#"["mcp", "resource"]"#).unwrap();
        assert!(multi.contains("resource"));
        assert!(!multi.contains("other"));
        assert_eq!(multi.to_vec(), vec!["mcp", "resource"]);
    }

    #[test]
    fn test_missing_scope_claim_grants_nothing() {
        let vocab = ScopeSet::parse("notes:read");
        assert!(extract_scopes(None, &vocab).is_empty());
        assert!(extract_scopes(Some(""), &vocab).is_empty());
    }

    #[test]
    fn test_unknown_scopes_kept_verbatim() {
        let scopes = extract_scopes(Some("openid profile notes:read"), &ScopeSet::new());
        assert_eq!(scopes, ScopeSet::parse("openid profile notes:read"));
    }

    #[test]
    fn test_truncated_claim_grants_nothing() {
        let vocab = ScopeSet::parse("notes:read notes:write calendar:read");
        let scopes = extract_scopes(Some("notes:read notes:write calendar:re"), &vocab);
        assert!(scopes.is_empty());
    }

    #[test]
    fn test_known_scope_that_prefixes_another_is_kept() {
        let vocab = ScopeSet::parse("notes notes:read");
        let scopes = extract_scopes(Some("notes"), &vocab);
        assert_eq!(scopes, ScopeSet::parse("notes"));
    }

    #[test]
    fn test_into_verified_requires_subject() {
        let raw = RawClaims::default();
        let err = raw
            .into_verified("https://idp", TokenFormat::Signed, &ScopeSet::new())
            .unwrap_err();
        assert_eq!(err, VerifyError::MissingClaim("sub"));
    }

    #[test]
    fn test_into_verified_maps_fields() {
        let raw: RawClaims = serde_json::from_value(serde_json::json!({
            "sub": "alice",
            "aud": ["mcp", "resource"],
            "exp": 4_102_444_800i64,
            "scope": "read write",
            "client_id": "agent",
            "tenant": "acme",
        }))
        .unwrap();
        assert!(raw.extra.contains_key("tenant"));

        let claims = raw
            .into_verified("https://idp", TokenFormat::Opaque, &ScopeSet::new())
            .unwrap();
        assert_eq!(claims.subject.as_str(), "alice");
        assert_eq!(claims.issuer, "https://idp");
        assert_eq!(claims.audience, vec!["mcp", "resource"]);
        assert_eq!(claims.scopes, ScopeSet::parse("write read"));
        assert_eq!(claims.authorized_party.as_deref(), Some("agent"));
        assert_eq!(claims.expires_at.unwrap().timestamp(), 4_102_444_800);
    }
}
