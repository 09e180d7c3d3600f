//! Shared gateway error type.
//!
//! Every filter and subsystem surfaces failures as a [`GatewayError`]
//! carrying `{status, code, message}`; the dispatcher's single error
//! boundary turns it into the `{code, message}` JSON body every caller
//! sees, instead of each module defining its own `IntoResponse`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// A gateway-level error with a stable machine-readable code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct GatewayError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// Extra response headers carried alongside the JSON error body, e.g.
    /// the rate limiter's `X-RateLimit-*` pair on a 429 (spec.md §4.7:
    /// those headers are emitted "on every rate-limited response").
    pub headers: Vec<(&'static str, String)>,
}

impl GatewayError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            headers: Vec::new(),
        }
    }

    /// Attaches one extra response header, returned alongside the error body.
    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "api.gateway.error.token.invalid", message)
    }

    /// Scope mismatch hides the route by reporting 404 instead of 403/401.
    pub fn route_not_found() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "api.gateway.error",
            "Request not found",
        )
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "api.gateway.error.access.denied", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "api.gateway.error.validation", message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "api.gateway.error.rate_limit", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "api.gateway.error.unavailable", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "api.gateway.error.internal", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "api.gateway.error.not_found", message)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                axum::http::HeaderName::from_bytes(name.as_bytes()),
                axum::http::HeaderValue::from_str(value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

/// Startup-time configuration errors. Fatal per spec §7 — the process must
/// abort rather than serve with a partially valid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("parse error: {0}")]
    Parse(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_not_found_hides_reason() {
        let err = GatewayError::route_not_found();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Request not found");
    }

    #[test]
    fn attached_headers_survive_into_response() {
        let err = GatewayError::rate_limited("rate limit exceeded")
            .with_header("x-ratelimit-remaining", "0")
            .with_header("x-ratelimit-burst-capacity", "5");
        let response = err.into_response();
        assert_eq!(response.headers().get("x-ratelimit-remaining").unwrap(), "0");
        assert_eq!(response.headers().get("x-ratelimit-burst-capacity").unwrap(), "5");
    }
}
