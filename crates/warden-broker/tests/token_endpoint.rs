//! The HTTP token endpoint client and a fully wired broker against a local
//! identity provider.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_broker::idp::{ACCESS_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT};
use warden_broker::{
    BrokerError, HttpTokenEndpoint, IdpError, InboundCredential, OutboundCredential, TokenBroker,
    TokenEndpoint,
};
use warden_core::config::{BrokerConfig, EndpointOverrides, RetryConfig, StorageBackend};
use warden_core::{
    BackgroundSettings, DeploymentMode, EncryptionKey, ExchangeSettings, OAuthSettings,
    PrincipalId, ScopeSet, SecretString,
};

#[derive(Clone)]
struct MockIdp {
    base_url: String,
    requests: Arc<Mutex<Vec<(Option<String>, HashMap<String, String>)>>>,
}

impl MockIdp {
    fn requests(&self) -> Vec<(Option<String>, HashMap<String, String>)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn discovery(State(idp): State<MockIdp>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "issuer": idp.base_url,
        "token_endpoint": format!("{}/token", idp.base_url),
    }))
}

async fn token(
    State(idp): State<MockIdp>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    idp.requests.lock().unwrap().push((authorization, form.clone()));

    let field = |name: &str| form.get(name).map(String::as_str);
    match field("grant_type") {
        Some("refresh_token") => match field("refresh_token") {
            Some("rt-void") => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": "invalid_grant",
                    "error_description": "refresh token revoked",
                })),
            )
                .into_response(),
            Some("rt-flaky") => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            Some(current) => Json(serde_json::json!({
                "access_token": format!("at-for-{}", current),
                "token_type": "Bearer",
                "expires_in": 300,
                "refresh_token": format!("{}-next", current),
                "scope": field("scope").unwrap_or_default(),
            }))
            .into_response(),
            None => StatusCode::BAD_REQUEST.into_response(),
        },
        Some(TOKEN_EXCHANGE_GRANT) => {
            if field("audience") != Some("resource") {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": "invalid_target" })),
                )
                    .into_response();
            }
            Json(serde_json::json!({
                "access_token": "delegated-token",
                "token_type": "Bearer",
                "expires_in": 60,
                "issued_token_type": ACCESS_TOKEN_TYPE,
                "scope": field("scope").unwrap_or_default(),
            }))
            .into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "unsupported_grant_type" })),
        )
            .into_response(),
    }
}

async fn start_idp() -> MockIdp {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let idp = MockIdp {
        base_url: format!("http://{}", addr),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/.well-known/openid-configuration", get(discovery))
        .route("/token", post(token))
        .with_state(idp.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    idp
}

fn endpoint(idp: &MockIdp, secret: Option<&str>) -> HttpTokenEndpoint {
    HttpTokenEndpoint::new(
        &idp.base_url,
        None,
        "warden",
        secret.map(SecretString::new),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_refresh_grant_over_http() {
    let idp = start_idp().await;
    let endpoint = endpoint(&idp, Some("client-secret"));

    let response = endpoint
        .refresh(&SecretString::new("rt-1"), &ScopeSet::parse("read"))
        .await
        .unwrap();
    assert_eq!(response.access_token.expose(), "at-for-rt-1");
    assert_eq!(response.refresh_token.unwrap().expose(), "rt-1-next");
    assert_eq!(response.scope.as_deref(), Some("read"));

    let requests = idp.requests();
    assert_eq!(requests.len(), 1);
    let (authorization, form) = &requests[0];
    // Basic base64("warden:client-secret")
    assert_eq!(authorization.as_deref(), Some("Basic d2FyZGVuOmNsaWVudC1zZWNyZXQ="));
    assert_eq!(form["grant_type"], "refresh_token");
    assert_eq!(form["refresh_token"], "rt-1");
    assert_eq!(form["scope"], "read");
    assert!(!form.contains_key("client_id"));
}

#[tokio::test]
async fn test_exchange_grant_over_http() {
    let idp = start_idp().await;
    let endpoint = endpoint(&idp, Some("client-secret"));

    let response = endpoint
        .exchange(&SecretString::new("inbound-jwt"), "resource", &ScopeSet::parse("notes:read"))
        .await
        .unwrap();
    assert_eq!(response.access_token.expose(), "delegated-token");
    assert_eq!(response.issued_token_type.as_deref(), Some(ACCESS_TOKEN_TYPE));

    let (_, form) = &idp.requests()[0];
    assert_eq!(form["grant_type"], TOKEN_EXCHANGE_GRANT);
    assert_eq!(form["subject_token"], "inbound-jwt");
    assert_eq!(form["subject_token_type"], ACCESS_TOKEN_TYPE);
    assert_eq!(form["audience"], "resource");
    assert_eq!(form["scope"], "notes:read");
}

#[tokio::test]
async fn test_error_responses_mapped() {
    let idp = start_idp().await;
    let endpoint = endpoint(&idp, Some("client-secret"));

    let err = endpoint
        .refresh(&SecretString::new("rt-void"), &ScopeSet::new())
        .await
        .unwrap_err();
    assert_eq!(err, IdpError::InvalidGrant("refresh token revoked".into()));

    let err = endpoint
        .refresh(&SecretString::new("rt-flaky"), &ScopeSet::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let err = endpoint
        .exchange(&SecretString::new("t"), "elsewhere", &ScopeSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IdpError::ScopeNotGrantable(_)));
}

#[tokio::test]
async fn test_public_client_sends_client_id() {
    let idp = start_idp().await;
    let endpoint = endpoint(&idp, None);

    endpoint
        .refresh(&SecretString::new("rt-1"), &ScopeSet::new())
        .await
        .unwrap();

    let (authorization, form) = &idp.requests()[0];
    assert!(authorization.is_none());
    assert_eq!(form["client_id"], "warden");
    assert!(!form.contains_key("scope"));
}

#[tokio::test]
async fn test_unreachable_provider_is_transient() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = HttpTokenEndpoint::new(
        format!("http://{}", addr),
        Some(format!("http://{}/token", addr)),
        "warden",
        None,
        Duration::from_secs(2),
    )
    .unwrap();
    let err = endpoint
        .refresh(&SecretString::new("rt-1"), &ScopeSet::new())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

fn exchange_mode(idp: &MockIdp) -> DeploymentMode {
    DeploymentMode::OAuthTokenExchange {
        oauth: OAuthSettings {
            issuer: idp.base_url.clone(),
            trusted_issuers: vec![idp.base_url.clone()],
            audience: "mcp".into(),
            resource_url: Some("https://resource.example.com".into()),
            admin_subjects: Vec::new(),
            scopes_supported: Vec::new(),
            hmac_key: None,
            endpoints: EndpointOverrides::default(),
            client_id: Some("warden".into()),
            client_secret: Some(SecretString::new("client-secret")),
        },
        exchange: ExchangeSettings {
            client_id: "warden".into(),
            client_secret: SecretString::new("client-secret"),
            resource_audience: "resource".into(),
        },
        background: BackgroundSettings {
            client_id: "warden".into(),
            client_secret: Some(SecretString::new("client-secret")),
            backend: StorageBackend::Memory,
            storage_path: None,
            encryption_key: EncryptionKey::from_bytes([5; 32]),
        },
    }
}

fn broker_config() -> BrokerConfig {
    BrokerConfig {
        lock_timeout_secs: 5,
        http_timeout_secs: 5,
        retry: RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        },
    }
}

#[tokio::test]
async fn test_broker_from_mode_end_to_end() {
    let idp = start_idp().await;
    let broker = TokenBroker::from_mode(&exchange_mode(&idp), &broker_config())
        .await
        .unwrap();
    assert!(broker.supports_background());

    let credential = broker
        .outbound_credential(
            Some(&InboundCredential::Bearer(SecretString::new("inbound-jwt"))),
            &ScopeSet::parse("notes:read"),
        )
        .await
        .unwrap();
    let OutboundCredential::Delegated(delegated) = credential else {
        panic!("expected a delegated token");
    };
    assert_eq!(delegated.audience(), ["resource".to_string()]);
    assert_eq!(delegated.into_bearer_header(), "Bearer delegated-token");

    let alice = PrincipalId::new("alice");
    broker
        .provision(&alice, &SecretString::new("rt-1"), &ScopeSet::parse("read write"))
        .await
        .unwrap();
    let token = broker
        .get_background_token(&alice, &ScopeSet::parse("read"))
        .await
        .unwrap();
    assert_eq!(token.value.expose(), "at-for-rt-1");
    assert_eq!(token.audience, vec!["resource".to_string()]);

    let grant = broker.store().unwrap().load(&alice).await.unwrap().unwrap();
    assert_eq!(grant.generation, 2);
    assert_eq!(grant.refresh_secret.expose(), "rt-1-next");

    broker.shutdown().await;
}

#[tokio::test]
async fn test_broker_transient_failure_leaves_record() {
    let idp = start_idp().await;
    let broker = TokenBroker::from_mode(&exchange_mode(&idp), &broker_config())
        .await
        .unwrap();

    let alice = PrincipalId::new("alice");
    broker
        .provision(&alice, &SecretString::new("rt-flaky"), &ScopeSet::parse("read"))
        .await
        .unwrap();

    let err = broker
        .get_background_token(&alice, &ScopeSet::parse("read"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::IdpUnavailable(_)));
    assert!(err.is_retryable());

    let refreshes = idp
        .requests()
        .iter()
        .filter(|(_, form)| form.get("grant_type").map(String::as_str) == Some("refresh_token"))
        .count();
    assert_eq!(refreshes, 2);

    let grant = broker.store().unwrap().load(&alice).await.unwrap().unwrap();
    assert_eq!(grant.generation, 1);
    assert_eq!(grant.refresh_secret.expose(), "rt-flaky");
}
