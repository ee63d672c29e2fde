//! # warden-authz
//!
//! Maps capability ids to the minimal scopes they require. The tool layer
//! registers each capability at startup, hides capabilities the caller's
//! scopes do not cover, and calls [`ScopeAuthorizer::authorize`] before
//! executing one.

pub mod authorizer;
pub mod capability;
pub mod error;

pub use authorizer::ScopeAuthorizer;
pub use capability::{CapabilityDescriptor, Classification};
pub use error::AuthzError;
