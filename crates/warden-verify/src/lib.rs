//! # warden-verify
//!
//! Inbound bearer token verification.
//!
//! [`TokenVerifier::verify`] accepts a signed (JWT) or opaque token and
//! returns [`VerifiedClaims`](warden_core::VerifiedClaims), enforcing the
//! deployment's [`AudienceRequirement`]:
//!
//! | Mode                   | Requirement                                      |
//! |------------------------|--------------------------------------------------|
//! | oauth-shared-audience  | `aud` contains our identifier                    |
//! | stateless-per-session  | `aud` contains our identifier                    |
//! | oauth-token-exchange   | `aud` is exactly our identifier                  |
//!
//! Subjects listed in `oauth.admin_subjects` bypass the audience check.

pub mod audience;
pub mod cache;
pub mod claims;
pub mod error;
pub mod keys;
pub mod remote;
pub mod verifier;

pub use audience::AudienceRequirement;
pub use cache::VerificationCache;
pub use claims::{RawClaims, TokenAudience, extract_scopes};
pub use error::VerifyError;
pub use remote::{ClientCredentials, HttpIdentityProvider, IdentityProvider, ProviderMetadata};
pub use verifier::TokenVerifier;
