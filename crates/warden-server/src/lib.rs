//! HTTP surface for Warden.
//!
//! Exposes protected-resource metadata, authenticates callers according to
//! the deployment mode and answers capability queries. The binary in
//! `main.rs` wires this to a listener.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, Caller, LOCAL_ISSUER};
