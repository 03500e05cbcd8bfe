//! SMART configuration discovery.
//!
//! Fetches `{issuer}/.well-known/smart-configuration` and resolves the
//! authorization and token endpoints. Both endpoints are mandatory and both
//! must use https; anything else fails the attempt before any flow state is
//! written.
//!
//! # References
//!
//! - [SMART App Launch: Conformance](https://hl7.org/fhir/smart-app-launch/conformance.html)

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::SmartResult;
use crate::error::SmartError;
use crate::transport::HttpTransport;

/// Well-known path appended to the issuer.
pub const SMART_CONFIGURATION_PATH: &str = ".well-known/smart-configuration";

/// The subset of the SMART configuration document this client reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartConfigurationDocument {
    /// Issuer advertised by the server.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Authorization endpoint.
    #[serde(default)]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint.
    #[serde(default)]
    pub token_endpoint: Option<String>,

    /// Supported token endpoint client authentication methods.
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,

    /// Supported PKCE methods.
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,

    /// SMART capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Endpoints resolved from a discovery document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartEndpoints {
    /// Where the user agent is sent to authorize.
    pub authorization_endpoint: Url,
    /// Where codes and assertions are exchanged for tokens.
    pub token_endpoint: Url,
}

/// Resolves SMART endpoints for an issuer.
#[derive(Clone)]
pub struct SmartDiscovery {
    transport: Arc<dyn HttpTransport>,
}

impl SmartDiscovery {
    /// Creates a discovery client over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Fetches and validates the SMART configuration for `issuer`.
    ///
    /// # Errors
    ///
    /// - `InsecureEndpoint` if the issuer or a discovered endpoint is not https
    /// - `Discovery` if the document is unavailable, malformed, or lacks an
    ///   endpoint
    /// - `UpstreamTimeout` / `Transport` from the transport
    pub async fn discover(&self, issuer: &str) -> SmartResult<SmartEndpoints> {
        let issuer_url = parse_https(issuer)
            .map_err(|e| match e {
                SmartError::InsecureEndpoint { .. } => e,
                _ => SmartError::discovery(format!("Invalid issuer URL: {issuer}")),
            })?;
        let discovery_url = build_discovery_url(&issuer_url)?;

        let response = self.transport.get_json(&discovery_url).await?;
        if !response.is_success() {
            tracing::warn!(
                "SMART discovery for {} returned HTTP {}",
                issuer,
                response.status
            );
            return Err(SmartError::discovery(format!(
                "HTTP {} from {}",
                response.status, discovery_url
            )));
        }

        let document: SmartConfigurationDocument = response.json().map_err(|e| {
            tracing::warn!("Failed to parse SMART configuration from {}: {}", issuer, e);
            SmartError::discovery(format!("Malformed SMART configuration: {e}"))
        })?;

        let endpoints = resolve_endpoints(&document)?;
        tracing::debug!(
            "Discovered SMART endpoints for {}: authorize={}, token={}",
            issuer,
            endpoints.authorization_endpoint,
            endpoints.token_endpoint
        );
        Ok(endpoints)
    }
}

/// Validates both endpoints of a discovery document.
///
/// # Errors
///
/// `Discovery` if an endpoint is absent or unparsable, `InsecureEndpoint` if
/// one is not https.
pub fn resolve_endpoints(document: &SmartConfigurationDocument) -> SmartResult<SmartEndpoints> {
    let authorization_endpoint = required_endpoint(
        "authorization_endpoint",
        document.authorization_endpoint.as_deref(),
    )?;
    let token_endpoint = required_endpoint("token_endpoint", document.token_endpoint.as_deref())?;
    Ok(SmartEndpoints {
        authorization_endpoint,
        token_endpoint,
    })
}

fn required_endpoint(field: &str, value: Option<&str>) -> SmartResult<Url> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SmartError::discovery(format!("{field} not found in SMART configuration")))?;
    parse_https(value).map_err(|e| match e {
        SmartError::InsecureEndpoint { .. } => {
            tracing::error!("Discovered {} {} is not https", field, value);
            e
        }
        _ => SmartError::discovery(format!("{field} is not a valid URL: {value}")),
    })
}

/// Parses `value` and requires the https scheme.
///
/// # Errors
///
/// `InsecureEndpoint` for any other scheme, `InvalidRequest` if unparsable.
pub fn parse_https(value: &str) -> SmartResult<Url> {
    let url = Url::parse(value)
        .map_err(|e| SmartError::invalid_request(format!("Invalid URL '{value}': {e}")))?;
    if url.scheme() != "https" {
        return Err(SmartError::insecure_endpoint(value));
    }
    Ok(url)
}

/// Builds `{issuer}/.well-known/smart-configuration`, keeping any issuer path.
fn build_discovery_url(issuer: &Url) -> SmartResult<Url> {
    let base = issuer.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{SMART_CONFIGURATION_PATH}"))
        .map_err(|e| SmartError::discovery(format!("Cannot build discovery URL: {e}")))
}
