//! SMART authorization error types.
//!
//! Every failure surfaced by this crate is a [`SmartError`]. Errors raised
//! while an authorization flow is running are wrapped in
//! [`SmartError::Flow`] so callers can tell which stage failed.

use std::fmt;

/// Stage of the authorization flow an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStage {
    /// Building the authorization redirect.
    Init,
    /// Validating the redirect back from the authorization server.
    AwaitingCallback,
    /// Exchanging the authorization code at the token endpoint.
    Exchanging,
}

impl FlowStage {
    /// Returns the stage name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::AwaitingCallback => "awaiting_callback",
            Self::Exchanging => "exchanging",
        }
    }
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while authorizing against a SMART on FHIR server.
#[derive(Debug, thiserror::Error)]
pub enum SmartError {
    /// A required setting is missing or invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An endpoint that must use https does not.
    #[error("Insecure endpoint: {url} must use https")]
    InsecureEndpoint {
        /// The offending URL.
        url: String,
    },

    /// The issuer's SMART configuration document is missing or malformed.
    #[error("Discovery error: {message}")]
    Discovery {
        /// Description of the discovery failure.
        message: String,
    },

    /// The callback `state` does not match the stored value.
    #[error("Invalid state: callback state does not match the authorization request")]
    InvalidState,

    /// A request parameter is missing, malformed or conflicting.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The callback carried no authorization code.
    #[error("Missing authorization code in callback")]
    MissingCode,

    /// No live flow exists for the correlation id.
    #[error("Authorization flow not found or expired")]
    FlowNotFound,

    /// The token endpoint rejected the exchange or answered with garbage.
    #[error("Token exchange failed: HTTP {status} - {body}")]
    TokenExchange {
        /// Upstream HTTP status.
        status: u16,
        /// Upstream response body, for diagnostics.
        body: String,
    },

    /// An upstream call did not complete within the configured timeout.
    #[error("Upstream timeout: {url}")]
    UpstreamTimeout {
        /// The URL that timed out.
        url: String,
    },

    /// An upstream call failed before a response was received.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the network failure.
        message: String,
    },

    /// A client assertion could not be built or signed.
    #[error("Signing error: {message}")]
    Signing {
        /// Description of the signing failure.
        message: String,
    },

    /// The resource server rejected a request.
    #[error("Resource request failed: HTTP {status} - {message}")]
    Resource {
        /// Upstream HTTP status.
        status: u16,
        /// Diagnostics from the resource server.
        message: String,
    },

    /// No session exists for the presented id.
    #[error("Session not found")]
    SessionNotFound,

    /// The session's access token has expired.
    #[error("Session expired")]
    SessionExpired,

    /// A lower-layer error annotated with the flow stage it occurred in.
    #[error("Authorization failed during {stage}: {source}")]
    Flow {
        /// Stage the flow was in.
        stage: FlowStage,
        /// The underlying error.
        #[source]
        source: Box<SmartError>,
    },
}

impl SmartError {
    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `InsecureEndpoint` error.
    #[must_use]
    pub fn insecure_endpoint(url: impl Into<String>) -> Self {
        Self::InsecureEndpoint { url: url.into() }
    }

    /// Creates a new `Discovery` error.
    #[must_use]
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `TokenExchange` error.
    #[must_use]
    pub fn token_exchange(status: u16, body: impl Into<String>) -> Self {
        Self::TokenExchange {
            status,
            body: body.into(),
        }
    }

    /// Creates a new `UpstreamTimeout` error.
    #[must_use]
    pub fn upstream_timeout(url: impl Into<String>) -> Self {
        Self::UpstreamTimeout { url: url.into() }
    }

    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a new `Signing` error.
    #[must_use]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Creates a new `Resource` error.
    #[must_use]
    pub fn resource(status: u16, message: impl Into<String>) -> Self {
        Self::Resource {
            status,
            message: message.into(),
        }
    }

    /// Wraps this error with the flow stage it occurred in.
    ///
    /// An error that already carries a stage keeps its original stage.
    #[must_use]
    pub fn in_stage(self, stage: FlowStage) -> Self {
        match self {
            Self::Flow { .. } => self,
            other => Self::Flow {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Returns the stage this error was raised in, if it came from a flow.
    #[must_use]
    pub fn stage(&self) -> Option<FlowStage> {
        match self {
            Self::Flow { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns the innermost error, unwrapping any flow context.
    #[must_use]
    pub fn root(&self) -> &SmartError {
        match self {
            Self::Flow { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` if the caller sent something wrong.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.root(),
            Self::InvalidState
                | Self::InvalidRequest { .. }
                | Self::MissingCode
                | Self::FlowNotFound
                | Self::SessionNotFound
                | Self::SessionExpired
        )
    }

    /// Returns `true` if the failure is on this side or upstream.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            Self::Configuration { .. } | Self::Signing { .. } => ErrorCategory::Configuration,
            Self::InsecureEndpoint { .. } => ErrorCategory::Security,
            Self::InvalidState
            | Self::InvalidRequest { .. }
            | Self::MissingCode
            | Self::FlowNotFound => ErrorCategory::Validation,
            Self::Discovery { .. }
            | Self::TokenExchange { .. }
            | Self::UpstreamTimeout { .. }
            | Self::Transport { .. }
            | Self::Resource { .. } => ErrorCategory::Upstream,
            Self::SessionNotFound | Self::SessionExpired => ErrorCategory::Session,
            Self::Flow { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self.root() {
            Self::InvalidState
            | Self::InvalidRequest { .. }
            | Self::MissingCode
            | Self::FlowNotFound
            | Self::InsecureEndpoint { .. } => "invalid_request",
            Self::TokenExchange { .. } => "invalid_grant",
            Self::UpstreamTimeout { .. } => "temporarily_unavailable",
            Self::SessionNotFound | Self::SessionExpired => "invalid_token",
            Self::Configuration { .. }
            | Self::Discovery { .. }
            | Self::Transport { .. }
            | Self::Signing { .. }
            | Self::Resource { .. }
            | Self::Flow { .. } => "server_error",
        }
    }
}

/// Categories of SMART errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or invalid settings, unusable keys.
    Configuration,
    /// Plaintext transport where https is required.
    Security,
    /// Malformed or mismatched protocol parameters.
    Validation,
    /// Discovery, token endpoint or resource server failures.
    Upstream,
    /// Missing or expired sessions.
    Session,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Security => write!(f, "security"),
            Self::Validation => write!(f, "validation"),
            Self::Upstream => write!(f, "upstream"),
            Self::Session => write!(f, "session"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SmartError::configuration("SMART_CLIENT_ID is required");
        assert_eq!(
            err.to_string(),
            "Configuration error: SMART_CLIENT_ID is required"
        );

        let err = SmartError::token_exchange(400, r#"{"error":"invalid_grant"}"#);
        assert_eq!(
            err.to_string(),
            r#"Token exchange failed: HTTP 400 - {"error":"invalid_grant"}"#
        );

        let err = SmartError::insecure_endpoint("http://ehr.example/auth");
        assert_eq!(
            err.to_string(),
            "Insecure endpoint: http://ehr.example/auth must use https"
        );
    }

    #[test]
    fn test_flow_wrapping() {
        let err = SmartError::InvalidState.in_stage(FlowStage::AwaitingCallback);
        assert_eq!(err.stage(), Some(FlowStage::AwaitingCallback));
        assert!(matches!(err.root(), SmartError::InvalidState));
        assert_eq!(
            err.to_string(),
            "Authorization failed during awaiting_callback: Invalid state: callback state does not match the authorization request"
        );

        // Re-wrapping keeps the innermost stage.
        let rewrapped = err.in_stage(FlowStage::Exchanging);
        assert_eq!(rewrapped.stage(), Some(FlowStage::AwaitingCallback));
    }

    #[test]
    fn test_error_predicates() {
        assert!(SmartError::MissingCode.is_client_error());
        assert!(SmartError::FlowNotFound.is_client_error());
        assert!(!SmartError::upstream_timeout("https://x").is_client_error());
        assert!(SmartError::upstream_timeout("https://x").is_server_error());

        let wrapped = SmartError::invalid_request("scope is required").in_stage(FlowStage::Init);
        assert!(wrapped.is_client_error());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            SmartError::configuration("x").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            SmartError::insecure_endpoint("http://x").category(),
            ErrorCategory::Security
        );
        assert_eq!(
            SmartError::discovery("x")
                .in_stage(FlowStage::Init)
                .category(),
            ErrorCategory::Upstream
        );
        assert_eq!(
            SmartError::SessionExpired.category(),
            ErrorCategory::Session
        );
    }

    #[test]
    fn test_oauth_error_code() {
        assert_eq!(SmartError::InvalidState.oauth_error_code(), "invalid_request");
        assert_eq!(
            SmartError::token_exchange(400, "").oauth_error_code(),
            "invalid_grant"
        );
        assert_eq!(
            SmartError::upstream_timeout("https://x").oauth_error_code(),
            "temporarily_unavailable"
        );
        assert_eq!(
            SmartError::signing("bad key").oauth_error_code(),
            "server_error"
        );
    }

    #[test]
    fn test_display_category_and_stage() {
        assert_eq!(ErrorCategory::Upstream.to_string(), "upstream");
        assert_eq!(FlowStage::Exchanging.to_string(), "exchanging");
    }
}
