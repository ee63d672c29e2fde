//! Request failures and the HTTP challenges they map to.

use axum::Json;
use axum::http::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use warden_authz::AuthzError;
use warden_broker::BrokerError;
use warden_verify::VerifyError;

/// Seconds a client should wait after a transient failure.
const RETRY_AFTER_SECS: &str = "5";

#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable bearer token was presented.
    #[error("bearer token required")]
    MissingBearer,

    /// No usable basic credentials were presented.
    #[error("basic credentials required")]
    MissingBasic,

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ApiError {
    /// Render as a response whose challenge points clients at
    /// `resource_metadata` for discovery.
    pub fn into_challenge(self, resource_metadata: &str) -> Response {
        match &self {
            ApiError::MissingBearer => challenge(
                StatusCode::UNAUTHORIZED,
                format!("Bearer resource_metadata=\"{}\"", resource_metadata),
                "invalid_request",
                &self,
            ),
            ApiError::MissingBasic => challenge(
                StatusCode::UNAUTHORIZED,
                "Basic realm=\"warden\"".to_string(),
                "invalid_request",
                &self,
            ),
            ApiError::Verify(err) if err.is_retryable() => unavailable(&self),
            ApiError::Verify(err) => challenge(
                StatusCode::UNAUTHORIZED,
                format!(
                    "Bearer error=\"{}\", error_description=\"{}\", resource_metadata=\"{}\"",
                    err.error_code(),
                    quote_safe(&err.to_string()),
                    resource_metadata
                ),
                err.error_code(),
                &self,
            ),
            ApiError::Authz(AuthzError::InsufficientScope { missing, .. }) => {
                insufficient_scope(&missing.to_scope_string(), resource_metadata, &self)
            }
            ApiError::Authz(AuthzError::UnknownCapability(_)) => {
                plain(StatusCode::NOT_FOUND, "not_found", &self)
            }
            ApiError::Authz(AuthzError::DuplicateCapability(_)) => {
                plain(StatusCode::INTERNAL_SERVER_ERROR, "server_error", &self)
            }
            ApiError::Broker(err) => broker_response(err, resource_metadata, &self),
        }
    }
}

fn broker_response(err: &BrokerError, resource_metadata: &str, source: &ApiError) -> Response {
    match err {
        BrokerError::ConsentRevoked(_) => challenge(
            StatusCode::UNAUTHORIZED,
            format!(
                "Bearer error=\"invalid_token\", error_description=\"re-authorization required\", resource_metadata=\"{}\"",
                resource_metadata
            ),
            "invalid_token",
            source,
        ),
        BrokerError::ScopeEscalationDenied { excess, .. } => {
            insufficient_scope(&excess.to_scope_string(), resource_metadata, source)
        }
        BrokerError::ScopeNotGrantable(_) => plain(StatusCode::FORBIDDEN, "insufficient_scope", source),
        BrokerError::ExchangeDenied(_) | BrokerError::RefreshDenied(_) => {
            plain(StatusCode::FORBIDDEN, "access_denied", source)
        }
        BrokerError::InboundCredential(_) => challenge(
            StatusCode::UNAUTHORIZED,
            format!("Bearer resource_metadata=\"{}\"", resource_metadata),
            "invalid_request",
            source,
        ),
        BrokerError::NotSupported(_) => plain(StatusCode::NOT_IMPLEMENTED, "unsupported", source),
        err if err.is_retryable() => unavailable(source),
        _ => plain(StatusCode::INTERNAL_SERVER_ERROR, "server_error", source),
    }
}

fn insufficient_scope(scope: &str, resource_metadata: &str, source: &ApiError) -> Response {
    challenge(
        StatusCode::FORBIDDEN,
        format!(
            "Bearer error=\"insufficient_scope\", scope=\"{}\", resource_metadata=\"{}\"",
            scope, resource_metadata
        ),
        "insufficient_scope",
        source,
    )
}

fn challenge(status: StatusCode, header: String, code: &str, source: &ApiError) -> Response {
    let mut response = plain(status, code, source);
    match HeaderValue::from_str(&header) {
        Ok(value) => {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        Err(e) => tracing::error!(error = %e, "Unencodable WWW-Authenticate header"),
    }
    response
}

fn unavailable(source: &ApiError) -> Response {
    let mut response = plain(StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable", source);
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
    response
}

fn plain(status: StatusCode, code: &str, source: &ApiError) -> Response {
    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), error = %source, "Request failed");
    } else {
        tracing::debug!(status = status.as_u16(), error = %source, "Request rejected");
    }
    (
        status,
        Json(json!({
            "error": code,
            "error_description": source.to_string(),
        })),
    )
        .into_response()
}

fn quote_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '\'' } else { c })
        .collect()
}
