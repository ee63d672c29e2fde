//! Audience policy.

use warden_core::{DeploymentMode, ModeKind};

/// How a token's `aud` claim must relate to this component's identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceRequirement {
    /// The audience must include the value. Other entries, such as one meant
    /// for the resource service, are ignored.
    Contains(String),
    /// The audience must be exactly this single value.
    Exact(String),
}

impl AudienceRequirement {
    /// The requirement used for inbound tokens in `mode`, if it verifies
    /// bearer tokens at all.
    pub fn for_mode(mode: &DeploymentMode) -> Option<Self> {
        let oauth = mode.oauth()?;
        let audience = oauth.audience.clone();
        match mode.kind() {
            ModeKind::OAuthTokenExchange => Some(Self::Exact(audience)),
            _ => Some(Self::Contains(audience)),
        }
    }

    pub fn expected(&self) -> &str {
        match self {
            Self::Contains(v) | Self::Exact(v) => v,
        }
    }

    pub fn is_satisfied_by(&self, audience: &[String]) -> bool {
        match self {
            Self::Contains(v) => audience.iter().any(|a| a == v),
            Self::Exact(v) => audience.len() == 1 && audience[0] == *v,
        }
    }
}
