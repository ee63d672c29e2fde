//! # warden-core
//!
//! Types shared by every Warden crate.
//!
//! - [`PrincipalId`] and [`ScopeSet`] identify who a credential acts for and
//!   what it may do.
//! - [`VerifiedClaims`] is the output of inbound verification and the input
//!   to authorization.
//! - [`AccessToken`] is a bearer credential obtained from the identity
//!   provider.
//! - [`SecretString`] keeps tokens and keys out of logs.
//! - [`config`] holds the configuration file model and [`mode`] resolves it
//!   into exactly one [`DeploymentMode`] at startup.

pub mod config;
pub mod error;
pub mod mode;
pub mod principal;
pub mod scope;
pub mod secret;
pub mod token;

pub use config::{CapabilityConfig, WardenConfig};
pub use error::ConfigError;
pub use mode::{
    BackgroundSettings, DeploymentMode, ExchangeSettings, ModeKind, OAuthSettings,
    PassthroughSettings, StaticSettings, StatelessSettings,
};
pub use principal::PrincipalId;
pub use scope::ScopeSet;
pub use secret::{EncryptionKey, SecretString};
pub use token::{AccessToken, TokenFormat, VerifiedClaims};
