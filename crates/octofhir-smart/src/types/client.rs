//! Relying-party client registrations.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::SmartError;

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types a registered client may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow with PKCE.
    AuthorizationCode,
    /// Client Credentials flow (backend services).
    ClientCredentials,
    /// Refresh Token flow.
    RefreshToken,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Client metadata submitted for registration.
///
/// Every field is optional on the wire so that missing values surface as
/// `InvalidRequest` rather than a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    /// Requested client id.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Display name.
    #[serde(default)]
    pub client_name: Option<String>,

    /// Allowed redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Allowed grant types. Empty means authorization code only.
    #[serde(default)]
    pub grant_types: Vec<GrantType>,
}

/// A registered relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredClient {
    /// Unique client id.
    pub client_id: String,

    /// Display name.
    pub client_name: String,

    /// Allowed redirect URIs (never empty).
    pub redirect_uris: Vec<String>,

    /// Allowed grant types (never empty).
    pub grant_types: Vec<GrantType>,

    /// Registration time.
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
}

impl RegisteredClient {
    /// Returns `true` if `redirect_uri` exactly matches a registered URI.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// Returns `true` if the client may use `grant_type`.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }
}

/// Validation errors for client registrations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    /// Client ID missing or blank.
    #[error("client_id is required")]
    MissingClientId,

    /// Client name missing or blank.
    #[error("client_name is required")]
    MissingName,

    /// No redirect URIs.
    #[error("at least one redirect_uri is required")]
    NoRedirectUris,

    /// A redirect URI is blank.
    #[error("redirect_uris must not contain empty values")]
    EmptyRedirectUri,
}

impl From<ClientValidationError> for SmartError {
    fn from(err: ClientValidationError) -> Self {
        SmartError::invalid_request(err.to_string())
    }
}

impl ClientRegistration {
    /// Validates the registration and produces the stored form.
    ///
    /// Grant types default to `authorization_code` when none are given.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn validate(self) -> Result<RegisteredClient, ClientValidationError> {
        let client_id = self
            .client_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(ClientValidationError::MissingClientId)?;
        let client_name = self
            .client_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(ClientValidationError::MissingName)?;
        if self.redirect_uris.is_empty() {
            return Err(ClientValidationError::NoRedirectUris);
        }
        if self.redirect_uris.iter().any(|uri| uri.trim().is_empty()) {
            return Err(ClientValidationError::EmptyRedirectUri);
        }

        let mut grant_types = self.grant_types;
        if grant_types.is_empty() {
            grant_types.push(GrantType::AuthorizationCode);
        }
        grant_types.dedup();

        Ok(RegisteredClient {
            client_id,
            client_name,
            redirect_uris: self.redirect_uris,
            grant_types,
            registered_at: OffsetDateTime::now_utc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> ClientRegistration {
        ClientRegistration {
            client_id: Some("app-1".to_string()),
            client_name: Some("App One".to_string()),
            redirect_uris: vec!["https://app.example/callback".to_string()],
            grant_types: vec![],
        }
    }

    #[test]
    fn test_grant_types_default_to_authorization_code() {
        let client = registration().validate().unwrap();
        assert_eq!(client.grant_types, vec![GrantType::AuthorizationCode]);
        assert!(client.is_grant_type_allowed(GrantType::AuthorizationCode));
        assert!(!client.is_grant_type_allowed(GrantType::ClientCredentials));
    }

    #[test]
    fn test_missing_fields() {
        let mut reg = registration();
        reg.client_id = Some("  ".to_string());
        assert_eq!(
            reg.validate().unwrap_err(),
            ClientValidationError::MissingClientId
        );

        let mut reg = registration();
        reg.client_name = None;
        assert_eq!(reg.validate().unwrap_err(), ClientValidationError::MissingName);

        let mut reg = registration();
        reg.redirect_uris.clear();
        assert_eq!(
            reg.validate().unwrap_err(),
            ClientValidationError::NoRedirectUris
        );
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let client = registration().validate().unwrap();
        assert!(client.is_redirect_uri_allowed("https://app.example/callback"));
        assert!(!client.is_redirect_uri_allowed("https://app.example/callback/"));
    }

    #[test]
    fn test_camel_case_wire_format() {
        let reg: ClientRegistration = serde_json::from_value(serde_json::json!({
            "clientId": "app-2",
            "clientName": "App Two",
            "redirectUris": ["https://two.example/cb"],
            "grantTypes": ["authorization_code", "client_credentials"]
        }))
        .unwrap();
        let client = reg.validate().unwrap();
        assert_eq!(client.grant_types.len(), 2);

        let json = serde_json::to_value(&client).unwrap();
        assert_eq!(json["clientId"], "app-2");
        assert_eq!(json["grantTypes"][1], "client_credentials");
    }
}
