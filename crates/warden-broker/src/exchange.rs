//! Session delegation through RFC 8693 token exchange.

use crate::error::{BrokerError, IdpError};
use crate::idp::{ACCESS_TOKEN_TYPE, TokenEndpoint};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use warden_core::{AccessToken, ScopeSet, SecretString};

/// A token derived from the live caller's token for one downstream call.
///
/// Not `Clone`: the holder uses it once and lets it go. It is never written
/// to the refresh token store.
#[derive(Debug)]
pub struct DelegatedToken {
    token: AccessToken,
}

impl DelegatedToken {
    fn new(token: AccessToken) -> Self {
        Self { token }
    }

    pub fn audience(&self) -> &[String] {
        &self.token.audience
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.token.scopes
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.token.expires_at
    }

    /// Consume the token into an `Authorization` header value.
    pub fn into_bearer_header(self) -> String {
        self.token.bearer_header()
    }

    pub fn into_access_token(self) -> AccessToken {
        self.token
    }
}

/// Exchanges inbound tokens for tokens aimed at the resource service.
pub struct TokenExchanger {
    endpoint: Arc<dyn TokenEndpoint>,
    resource_audience: String,
    retry: RetryPolicy,
}

impl TokenExchanger {
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        resource_audience: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            endpoint,
            resource_audience: resource_audience.into(),
            retry,
        }
    }

    pub fn resource_audience(&self) -> &str {
        &self.resource_audience
    }

    /// Exchange `subject_token` for the minimal `required_scopes` at the
    /// resource audience.
    pub async fn exchange(
        &self,
        subject_token: &SecretString,
        required_scopes: &ScopeSet,
    ) -> Result<DelegatedToken, BrokerError> {
        let response = self
            .retry
            .run("token_exchange", || {
                self.endpoint
                    .exchange(subject_token, &self.resource_audience, required_scopes)
            })
            .await
            .map_err(|err| {
                tracing::warn!(
                    audience = %self.resource_audience,
                    scopes = %required_scopes,
                    error = %err,
                    "Token exchange failed"
                );
                exchange_error(err)
            })?;

        if let Some(issued) = response.issued_token_type.as_deref() {
            if issued != ACCESS_TOKEN_TYPE {
                return Err(BrokerError::Protocol(format!(
                    "exchange issued {} instead of an access token",
                    issued
                )));
            }
        }

        // A refresh token from an exchange is dropped; session authority
        // must not outlive the request.
        let (token, _) = response.into_access_token(
            vec![self.resource_audience.clone()],
            required_scopes,
            None,
        );

        tracing::debug!(
            audience = %self.resource_audience,
            scopes = %token.scopes,
            "Exchanged session token"
        );
        Ok(DelegatedToken::new(token))
    }
}

fn exchange_error(err: IdpError) -> BrokerError {
    match err {
        IdpError::InvalidGrant(description) => BrokerError::ExchangeDenied(description),
        IdpError::Denied { code, description } => {
            BrokerError::ExchangeDenied(format!("{}: {}", code, description))
        }
        IdpError::ScopeNotGrantable(description) => BrokerError::ScopeNotGrantable(description),
        IdpError::Unavailable(description) => BrokerError::IdpUnavailable(description),
        IdpError::Protocol(description) => BrokerError::Protocol(description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idp::TokenResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedEndpoint {
        results: Mutex<Vec<Result<TokenResponse, IdpError>>>,
        seen: Mutex<Vec<(String, String, ScopeSet)>>,
    }

    impl ScriptedEndpoint {
        fn new(results: Vec<Result<TokenResponse, IdpError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TokenEndpoint for ScriptedEndpoint {
        async fn exchange(
            &self,
            subject_token: &SecretString,
            audience: &str,
            scopes: &ScopeSet,
        ) -> Result<TokenResponse, IdpError> {
            self.seen.lock().unwrap().push((
                subject_token.expose().to_string(),
                audience.to_string(),
                scopes.clone(),
            ));
            self.results.lock().unwrap().remove(0)
        }

        async fn refresh(&self, _: &SecretString, _: &ScopeSet) -> Result<TokenResponse, IdpError> {
            unreachable!("exchange tests never refresh")
        }
    }

    fn issued(value: &str) -> TokenResponse {
        serde_json::from_value(serde_json::json!({
            "access_token": value,
            "expires_in": 60,
            "issued_token_type": ACCESS_TOKEN_TYPE,
            "refresh_token": "must-not-survive",
        }))
        .unwrap()
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, std::time::Duration::from_millis(1), std::time::Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_exchange_requests_resource_audience_and_minimal_scopes() {
        let endpoint = ScriptedEndpoint::new(vec![Ok(issued("delegated-1"))]);
        let exchanger = TokenExchanger::new(endpoint.clone(), "resource", fast());

        let token = exchanger
            .exchange(&SecretString::new("inbound"), &ScopeSet::parse("notes:read"))
            .await
            .unwrap();

        assert_eq!(token.audience(), ["resource".to_string()]);
        assert_eq!(token.scopes(), &ScopeSet::parse("notes:read"));
        assert_eq!(token.into_bearer_header(), "Bearer delegated-1");

        let seen = endpoint.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "inbound");
        assert_eq!(seen[0].1, "resource");
        assert_eq!(seen[0].2, ScopeSet::parse("notes:read"));
    }

    #[tokio::test]
    async fn test_denial_is_terminal() {
        let endpoint = ScriptedEndpoint::new(vec![Err(IdpError::Denied {
            code: "access_denied".into(),
            description: "policy".into(),
        })]);
        let exchanger = TokenExchanger::new(endpoint.clone(), "resource", fast());

        let err = exchanger
            .exchange(&SecretString::new("inbound"), &ScopeSet::parse("read"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ExchangeDenied(_)));
        assert!(err.is_terminal());
        assert_eq!(endpoint.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_retried_then_surfaced() {
        let endpoint = ScriptedEndpoint::new(vec![
            Err(IdpError::Unavailable("503".into())),
            Err(IdpError::Unavailable("503".into())),
            Err(IdpError::Unavailable("503".into())),
        ]);
        let exchanger = TokenExchanger::new(endpoint.clone(), "resource", fast());

        let err = exchanger
            .exchange(&SecretString::new("inbound"), &ScopeSet::parse("read"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::IdpUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(endpoint.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_scope_not_grantable() {
        let endpoint = ScriptedEndpoint::new(vec![Err(IdpError::ScopeNotGrantable("admin".into()))]);
        let exchanger = TokenExchanger::new(endpoint, "resource", fast());
        let err = exchanger
            .exchange(&SecretString::new("inbound"), &ScopeSet::parse("admin"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ScopeNotGrantable(_)));
    }
}
