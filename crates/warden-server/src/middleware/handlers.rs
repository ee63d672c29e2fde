use crate::error::ApiError;
use crate::state::{AppState, Caller};
use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;
use serde_json::{Value, json};
use std::sync::Arc;

/// RFC 9728 protected resource metadata.
pub async fn protected_resource_metadata(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut scopes = state.authorizer.supported_scopes();
    let mut authorization_servers = Vec::new();
    if let Some(oauth) = state.mode.oauth() {
        scopes.extend(oauth.scopes_supported.iter().cloned());
        authorization_servers.push(oauth.issuer.clone());
    }

    Json(json!({
        "resource": state.server.base_url(),
        "resource_name": "warden",
        "authorization_servers": authorization_servers,
        "scopes_supported": scopes,
        "bearer_methods_supported": ["header"],
    }))
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "warden",
        "mode": state.mode.kind(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn whoami(caller: axum::Extension<Caller>) -> Json<Value> {
    let claims = &caller.claims;
    Json(json!({
        "subject": claims.subject,
        "issuer": claims.issuer,
        "audience": claims.audience,
        "scopes": claims.scopes,
        "expires_at": claims.expires_at,
        "format": claims.format,
    }))
}

/// Capabilities the caller's scopes satisfy.
pub async fn list_capabilities(
    State(state): State<Arc<AppState>>,
    caller: axum::Extension<Caller>,
) -> Json<Value> {
    let capabilities = state.authorizer.filter_capabilities(&caller.claims);
    Json(json!({ "capabilities": capabilities }))
}

/// Re-check a single capability for the caller and obtain the credential
/// its downstream call would carry.
pub async fn get_capability(
    State(state): State<Arc<AppState>>,
    caller: axum::Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>, Response> {
    let challenge = |err: ApiError| err.into_challenge(&state.resource_metadata_url());

    let capability = state
        .authorizer
        .authorize(&id, &caller.claims)
        .map_err(|err| challenge(err.into()))?;
    let credential = state
        .broker
        .outbound_credential(caller.credential.as_ref(), &capability.required_scopes)
        .await
        .map_err(|err| challenge(err.into()))?;

    Ok(Json(json!({
        "id": capability.id,
        "required_scopes": capability.required_scopes,
        "classification": capability.classification,
        "credential": credential.kind(),
    })))
}

/// Check that the caller's stored grant can still mint a background
/// token for this capability. The token itself is never returned.
pub async fn background_capability(
    State(state): State<Arc<AppState>>,
    caller: axum::Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Value>, Response> {
    let challenge = |err: ApiError| err.into_challenge(&state.resource_metadata_url());

    let capability = state
        .authorizer
        .authorize(&id, &caller.claims)
        .map_err(|err| challenge(err.into()))?;
    let token = state
        .broker
        .get_background_token(&caller.claims.subject, &capability.required_scopes)
        .await
        .map_err(|err| challenge(err.into()))?;

    Ok(Json(json!({
        "id": capability.id,
        "scopes": token.scopes,
        "audience": token.audience,
        "expires_at": token.expires_at,
    })))
}
