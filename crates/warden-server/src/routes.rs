use crate::middleware::{auth, handlers};
use crate::state::AppState;
use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use std::sync::Arc;

/// Build the HTTP router.
///
/// Discovery and health endpoints are public. Everything else passes
/// through [`auth::authenticate`] first.
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/whoami", get(handlers::whoami))
        .route("/capabilities", get(handlers::list_capabilities))
        .route("/capabilities/{id}", get(handlers::get_capability))
        .route(
            "/capabilities/{id}/background",
            post(handlers::background_capability),
        )
        .route_layer(from_fn_with_state(state.clone(), auth::authenticate));

    Router::new()
        .route(
            "/.well-known/oauth-protected-resource",
            get(handlers::protected_resource_metadata),
        )
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
}
