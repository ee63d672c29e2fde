//! Error types for token verification.

use thiserror::Error;

/// Reasons an inbound bearer token is rejected.
///
/// Everything except [`VerifyError::IdpUnavailable`] is a per-request
/// authentication failure that retrying with the same token cannot fix.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// Signature did not verify, or no key could verify it.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Token is past its `exp`.
    #[error("token has expired")]
    ExpiredToken,

    /// Audience does not satisfy the policy for this deployment.
    #[error("audience mismatch: expected {expected}, got [{}]", actual.join(", "))]
    AudienceMismatch {
        expected: String,
        actual: Vec<String>,
    },

    /// Issuer is not one of the trusted issuers.
    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),

    /// The identity provider reports the token as inactive.
    #[error("token is not active")]
    InactiveToken,

    /// A claim needed to identify the caller is absent.
    #[error("token missing required claim: {0}")]
    MissingClaim(&'static str),

    /// Token could not be parsed or no verification path applies.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The identity provider could not be reached.
    #[error("identity provider unavailable: {0}")]
    IdpUnavailable(String),
}

impl VerifyError {
    /// Whether a later attempt with the same token might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VerifyError::IdpUnavailable(_))
    }

    /// OAuth error code for a `WWW-Authenticate` challenge.
    pub fn error_code(&self) -> &'static str {
        match self {
            VerifyError::IdpUnavailable(_) => "temporarily_unavailable",
            _ => "invalid_token",
        }
    }
}

impl From<reqwest::Error> for VerifyError {
    fn from(err: reqwest::Error) -> Self {
        VerifyError::IdpUnavailable(err.to_string())
    }
}
