use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use warden_broker::InboundCredential;

/// Axum middleware identifying the caller.
///
/// On success the request carries a [`Caller`](crate::state::Caller)
/// extension. On failure the response is the matching challenge.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let credential = extract_credential(req.headers());

    let caller = state.authenticate(credential).await.map_err(|err| {
        err.into_challenge(&state.resource_metadata_url())
    })?;

    tracing::debug!(
        subject = %caller.claims.subject,
        scopes = %caller.claims.scopes,
        "Authenticated request"
    );
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

fn extract_credential(headers: &HeaderMap) -> Option<InboundCredential> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(InboundCredential::from_authorization_header)
}
