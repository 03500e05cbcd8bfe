//! SMART Backend Services (client_credentials with a signed assertion).
//!
//! Used by system-to-system clients that have no user in the loop. The
//! client authenticates with a JWT assertion signed by its private key.

use std::sync::Arc;

use url::Url;

use super::assertion::{CLIENT_ASSERTION_TYPE, ClientAssertionSigner};
use super::controller::token_result_from_response;
use super::discovery::{SmartDiscovery, parse_https};
use super::token::TokenResult;
use crate::SmartResult;
use crate::audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::config::SmartConfig;
use crate::error::SmartError;
use crate::transport::HttpTransport;

/// Obtains access tokens with the client_credentials grant.
pub struct BackendServicesClient {
    client_id: String,
    default_scope: Option<String>,
    issuer: Option<String>,
    token_uri: Option<String>,
    transport: Arc<dyn HttpTransport>,
    discovery: SmartDiscovery,
    signer: Arc<ClientAssertionSigner>,
    audit: Arc<dyn AuditSink>,
}

impl BackendServicesClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// `Configuration` if `client_id` or the private key is missing, or if
    /// neither a token endpoint nor an issuer is configured.
    pub fn new(config: &SmartConfig, transport: Arc<dyn HttpTransport>) -> SmartResult<Self> {
        config.validate()?;
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| SmartError::configuration("client_id is required for backend services"))?;
        let signer = ClientAssertionSigner::from_config(config)?;
        if !signer.is_configured() {
            return Err(SmartError::configuration(
                "private_key is required for backend services",
            ));
        }
        if config.token_uri.is_none() && config.issuer().is_none() {
            return Err(SmartError::configuration(
                "token_uri or iss is required for backend services",
            ));
        }

        Ok(Self {
            client_id,
            default_scope: config.scope.clone(),
            issuer: config.issuer().map(str::to_string),
            token_uri: config.token_uri.clone(),
            discovery: SmartDiscovery::new(transport.clone()),
            transport,
            signer: Arc::new(signer),
            audit: Arc::new(TracingAuditSink),
        })
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Requests a token for `scope`, or the configured scope when `None`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if no scope is available, `Discovery` when the token
    /// endpoint cannot be resolved, `TokenExchange` for rejected requests,
    /// and transport errors.
    pub async fn request_token(&self, scope: Option<&str>) -> SmartResult<TokenResult> {
        let result = self.request_token_inner(scope).await;
        let outcome = if result.is_ok() {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        self.audit
            .record(AuditEvent::new(&self.client_id, AuditAction::Token, outcome));
        if let Err(e) = &result {
            tracing::warn!(category = %e.category(), "Backend services token request failed: {}", e);
        }
        result
    }

    async fn request_token_inner(&self, scope: Option<&str>) -> SmartResult<TokenResult> {
        let scope = scope
            .or(self.default_scope.as_deref())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SmartError::invalid_request("scope is required"))?;

        let token_endpoint = self.token_endpoint().await?;
        let assertion = self.signer.sign(&self.client_id, token_endpoint.as_str())?;

        let form = [
            ("grant_type", "client_credentials"),
            ("scope", scope),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
        ];
        tracing::debug!("Requesting backend services token from {}", token_endpoint);
        let response = self.transport.post_form(&token_endpoint, &form).await?;
        token_result_from_response(response.status, &response.body)
    }

    async fn token_endpoint(&self) -> SmartResult<Url> {
        if let Some(uri) = &self.token_uri {
            return parse_https(uri);
        }
        match &self.issuer {
            Some(issuer) => Ok(self.discovery.discover(issuer).await?.token_endpoint),
            None => Err(SmartError::configuration("No token endpoint configured")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::oauth::SigningAlgorithm;
    use crate::transport::ReqwestTransport;
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rsa_key() -> String {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        URL_SAFE_NO_PAD.encode(key.to_pkcs8_pem(LineEnding::LF).unwrap().as_bytes())
    }

    fn config(token_uri: Option<String>) -> SmartConfig {
        SmartConfig {
            client_id: Some("backend-app".to_string()),
            scope: Some("system/*.read".to_string()),
            iss: Some("https://ehr.example/fhir".to_string()),
            private_key: Some(rsa_key()),
            signing_alg: Some(SigningAlgorithm::RS384),
            token_uri,
            ..Default::default()
        }
    }

    fn transport() -> Arc<dyn HttpTransport> {
        Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap())
    }

    #[test]
    fn test_requires_private_key() {
        let mut config = config(None);
        config.private_key = None;
        config.signing_alg = None;
        let err = BackendServicesClient::new(&config, transport()).err().unwrap();
        assert!(matches!(err, SmartError::Configuration { .. }));
    }

    #[test]
    fn test_rejects_plain_http_token_uri() {
        let config = config(Some("http://ehr.example/token".to_string()));
        let err = BackendServicesClient::new(&config, transport()).err().unwrap();
        assert!(matches!(err, SmartError::InsecureEndpoint { .. }));
    }

    /// Sends every request to the mock server, which only speaks plain http.
    struct Redirecting {
        inner: ReqwestTransport,
        target: Url,
    }

    #[async_trait::async_trait]
    impl HttpTransport for Redirecting {
        async fn get_json(&self, _url: &Url) -> SmartResult<crate::transport::UpstreamResponse> {
            self.inner.get_json(&self.target).await
        }

        async fn post_form(
            &self,
            _url: &Url,
            fields: &[(&str, &str)],
        ) -> SmartResult<crate::transport::UpstreamResponse> {
            self.inner.post_form(&self.target, fields).await
        }
    }

    async fn client_against(server: &MockServer) -> (BackendServicesClient, MemoryAuditSink) {
        let transport = Arc::new(Redirecting {
            inner: ReqwestTransport::new(Duration::from_secs(5)).unwrap(),
            target: Url::parse(&format!("{}/token", server.uri())).unwrap(),
        });
        let audit = MemoryAuditSink::new();
        let client = BackendServicesClient::new(
            &config(Some("https://ehr.example/token".to_string())),
            transport,
        )
        .unwrap()
        .with_audit_sink(Arc::new(audit.clone()));
        (client, audit)
    }

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("scope=system%2F*.read"))
            .and(body_string_contains("client_assertion="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "backend-token",
                "token_type": "Bearer",
                "expires_in": 300,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, audit) = client_against(&server).await;
        let token = client.request_token(None).await.unwrap();
        assert_eq!(token.access_token, "backend-token");
        assert_eq!(token.expires_in, Some(300));
        assert_eq!(audit.events()[0].outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "error": "invalid_client" })),
            )
            .mount(&server)
            .await;

        let (client, audit) = client_against(&server).await;
        let err = client.request_token(Some("system/Patient.read")).await.unwrap_err();
        assert!(matches!(err, SmartError::TokenExchange { status: 401, .. }));
        assert_eq!(audit.events()[0].outcome, AuditOutcome::Failure);
    }
}
