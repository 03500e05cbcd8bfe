//! Error responses for the SMART HTTP front.
//!
//! Implements `IntoResponse` for `SmartError` as a FHIR OperationOutcome
//! with an OAuth error coding.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{ErrorCategory, SmartError};

// =============================================================================
// IntoResponse Implementation
// =============================================================================

impl IntoResponse for SmartError {
    fn into_response(self) -> Response {
        let (status, issue_code) = error_details(&self);
        let oauth_error = self.oauth_error_code();

        // Upstream and internal detail stays in the log.
        let diagnostics = match self.category() {
            ErrorCategory::Upstream | ErrorCategory::Configuration | ErrorCategory::Internal => {
                tracing::error!(category = %self.category(), "Request failed: {}", self);
                generic_message(&self).to_string()
            }
            _ => self.to_string(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/fhir+json"),
        );
        if status == StatusCode::UNAUTHORIZED {
            let www_auth = format!(
                "Bearer realm=\"octofhir-smart\", error=\"{}\"",
                oauth_error
            );
            if let Ok(value) = HeaderValue::from_str(&www_auth) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        let body = operation_outcome_json("error", issue_code, oauth_error, &diagnostics);
        (status, headers, Json(body)).into_response()
    }
}

/// Returns (HTTP status, FHIR issue code).
fn error_details(error: &SmartError) -> (StatusCode, &'static str) {
    match error.root() {
        SmartError::InvalidState | SmartError::InvalidRequest { .. } | SmartError::MissingCode => {
            (StatusCode::BAD_REQUEST, "invalid")
        }
        SmartError::FlowNotFound => (StatusCode::BAD_REQUEST, "not-found"),
        SmartError::InsecureEndpoint { .. } => (StatusCode::BAD_REQUEST, "security"),
        SmartError::SessionNotFound => (StatusCode::UNAUTHORIZED, "security"),
        SmartError::SessionExpired => (StatusCode::UNAUTHORIZED, "expired"),
        SmartError::UpstreamTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        SmartError::Discovery { .. }
        | SmartError::TokenExchange { .. }
        | SmartError::Transport { .. } => (StatusCode::BAD_GATEWAY, "exception"),
        SmartError::Resource { status, .. } => (
            StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            "exception",
        ),
        SmartError::Configuration { .. } | SmartError::Signing { .. } | SmartError::Flow { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "exception")
        }
    }
}

fn generic_message(error: &SmartError) -> &'static str {
    match error.root() {
        SmartError::Discovery { .. } => "Authorization server discovery failed",
        SmartError::TokenExchange { .. } => "Token exchange failed",
        SmartError::UpstreamTimeout { .. } | SmartError::Transport { .. } => {
            "Upstream server is unavailable"
        }
        SmartError::Resource { .. } => "Resource server request failed",
        _ => "Internal server error",
    }
}

/// Creates a FHIR OperationOutcome JSON for an error.
#[must_use]
pub fn operation_outcome_json(
    severity: &str,
    code: &str,
    oauth_error: &str,
    diagnostics: &str,
) -> serde_json::Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": severity,
            "code": code,
            "details": {
                "coding": [{
                    "system": "https://tools.ietf.org/html/rfc6749",
                    "code": oauth_error
                }]
            },
            "diagnostics": diagnostics
        }]
    })
}
