//! Token endpoint requests and responses.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::assertion::CLIENT_ASSERTION_TYPE;

/// Successful token endpoint response.
///
/// SMART servers may add launch context (`patient`, `encounter`) next to the
/// standard OAuth fields.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResult {
    /// The access token.
    pub access_token: String,

    /// Token type, normally `Bearer`.
    pub token_type: String,

    /// Lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Granted scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Refresh token, when granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Patient in context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,

    /// Encounter in context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter: Option<String>,
}

impl fmt::Debug for TokenResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResult")
            .field("access_token", &"***")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("patient", &self.patient)
            .field("encounter", &self.encounter)
            .finish()
    }
}

impl TokenResult {
    /// Parses a token endpoint body, rejecting empty tokens.
    ///
    /// # Errors
    ///
    /// Returns a description of what is wrong with the body.
    pub fn parse(body: &str) -> Result<Self, String> {
        let token: Self =
            serde_json::from_str(body).map_err(|e| format!("Malformed token response: {e}"))?;
        if token.access_token.is_empty() {
            return Err("Token response has an empty access_token".to_string());
        }
        if token.token_type.is_empty() {
            return Err("Token response has an empty token_type".to_string());
        }
        Ok(token)
    }
}

/// OAuth error body returned by token endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct OAuthErrorResponse {
    pub(crate) error: String,
    #[serde(default)]
    pub(crate) error_description: Option<String>,
}

/// Form fields of an authorization code exchange.
#[derive(Debug, Clone)]
pub struct AuthorizationCodeRequest<'a> {
    /// Authorization code from the callback.
    pub code: &'a str,
    /// Redirect URI the code was delivered to.
    pub redirect_uri: &'a str,
    /// Client id.
    pub client_id: &'a str,
    /// PKCE verifier.
    pub code_verifier: &'a str,
    /// Signed client assertion for confidential clients.
    pub client_assertion: Option<&'a str>,
}

impl<'a> AuthorizationCodeRequest<'a> {
    /// Form fields in submission order.
    #[must_use]
    pub fn to_form(&self) -> Vec<(&'static str, &'a str)> {
        let mut fields = vec![
            ("grant_type", "authorization_code"),
            ("code", self.code),
            ("redirect_uri", self.redirect_uri),
            ("client_id", self.client_id),
            ("code_verifier", self.code_verifier),
        ];
        if let Some(assertion) = self.client_assertion {
            fields.push(("client_assertion_type", CLIENT_ASSERTION_TYPE));
            fields.push(("client_assertion", assertion));
        }
        fields
    }
}
