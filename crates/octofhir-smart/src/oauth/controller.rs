//! Authorization code flow controller.
//!
//! Drives one authorization attempt through its states:
//!
//! ```text
//! Init ──start()──► AwaitingCallback ──callback()──► Exchanging ──► Completed
//!   │                      │                              │
//!   └──────────────────────┴──────────────► Failed ◄──────┘
//! ```
//!
//! `start` discovers the issuer's endpoints, generates PKCE material,
//! persists a [`FlowState`] and returns the redirect URL together with the
//! flow id the caller must hand to the user agent in an HttpOnly cookie.
//! `complete` takes that flow id back from the cookie, checks `state`,
//! consumes the flow, exchanges the code and issues a session.
//!
//! Every failure is wrapped with the stage it happened in, logged, and
//! reported to the audit sink. A failed attempt cannot be resumed.

use std::sync::Arc;

use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use super::assertion::ClientAssertionSigner;
use super::discovery::{SmartDiscovery, parse_https};
use super::flow::{FlowState, FlowStatus, LaunchContext, NewFlow};
use super::pkce::PkceTriple;
use super::token::{AuthorizationCodeRequest, OAuthErrorResponse, TokenResult};
use crate::SmartResult;
use crate::audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::config::SmartConfig;
use crate::error::SmartError;
use crate::session::{Session, SessionIssuer};
use crate::storage::{ClientRegistry, FlowStateStore, InMemoryClientRegistry, TakeOutcome};
use crate::transport::HttpTransport;
use crate::types::GrantType;

// =============================================================================
// Requests and Results
// =============================================================================

/// Inputs of an authorization attempt.
///
/// Missing values are filled from [`SmartConfig`] by
/// [`AuthorizationRequest::merged_with`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationRequest {
    /// Client id.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Requested scope.
    #[serde(default)]
    pub scope: Option<String>,
    /// Redirect URI registered for the client.
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Issuer / FHIR base URL.
    #[serde(default, alias = "iss")]
    pub issuer: Option<String>,
    /// EHR launch token. `"true"`/`"false"` flags are not forwarded.
    #[serde(default)]
    pub launch: Option<String>,
}

impl AuthorizationRequest {
    /// An EHR-initiated launch carrying only the issuer and launch token.
    #[must_use]
    pub fn ehr_launch(issuer: impl Into<String>, launch: impl Into<String>) -> Self {
        Self {
            issuer: Some(issuer.into()),
            launch: Some(launch.into()),
            ..Default::default()
        }
    }

    /// Fills unset fields from configuration. Explicit values win.
    #[must_use]
    pub fn merged_with(self, config: &SmartConfig) -> Self {
        Self {
            client_id: self.client_id.or_else(|| config.client_id.clone()),
            scope: self.scope.or_else(|| config.scope.clone()),
            redirect_uri: self.redirect_uri.or_else(|| config.redirect_uri.clone()),
            issuer: self
                .issuer
                .or_else(|| config.issuer().map(str::to_string)),
            launch: self.launch.or_else(|| config.launch_token.clone()),
        }
    }

    /// The launch token, if it is an opaque value rather than a flag.
    #[must_use]
    pub fn launch_token(&self) -> Option<&str> {
        self.launch
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("true") && !l.eq_ignore_ascii_case("false"))
    }
}

/// Redirect produced by [`AuthorizationFlowController::start`].
#[derive(Debug, Clone)]
pub struct AuthorizationRedirect {
    /// Correlation id to store in the flow cookie.
    pub flow_id: Uuid,
    /// Authorization endpoint URL with all query parameters.
    pub url: Url,
    /// When the flow expires.
    pub expires_at: OffsetDateTime,
}

/// The redirect back from the authorization server.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    /// Flow id from the correlation cookie.
    pub flow_id: Option<Uuid>,
    /// Full URL the callback was received on.
    pub callback_url: Url,
    /// `code` query parameter.
    pub code: Option<String>,
    /// `state` query parameter.
    pub state: Option<String>,
    /// `error` query parameter, when the server refused.
    pub error: Option<String>,
}

impl CallbackRequest {
    /// Builds a callback from its URL, reading `code`, `state` and `error`.
    #[must_use]
    pub fn from_url(flow_id: Option<Uuid>, callback_url: Url) -> Self {
        let mut code = None;
        let mut state = None;
        let mut error = None;
        for (key, value) in callback_url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }
        Self {
            flow_id,
            callback_url,
            code,
            state,
            error,
        }
    }
}

/// Outcome of a completed flow.
#[derive(Debug, Clone)]
pub struct CompletedFlow {
    /// Session bound to the obtained token.
    pub session: Session,
    /// Client the flow ran for.
    pub client_id: String,
    /// EHR launch context the flow started with.
    pub launch_context: Option<LaunchContext>,
    /// Final status of the attempt (always `Completed`).
    pub status: FlowStatus,
}

// =============================================================================
// Controller
// =============================================================================

/// Orchestrates discovery, redirect, callback validation and token exchange.
pub struct AuthorizationFlowController {
    config: SmartConfig,
    discovery: SmartDiscovery,
    transport: Arc<dyn HttpTransport>,
    flows: Arc<dyn FlowStateStore>,
    sessions: Arc<SessionIssuer>,
    signer: Arc<ClientAssertionSigner>,
    clients: Arc<dyn ClientRegistry>,
    audit: Arc<dyn AuditSink>,
    flow_ttl: time::Duration,
}

impl AuthorizationFlowController {
    /// Creates a controller. The assertion signer is built from `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid or its private
    /// key cannot be loaded.
    pub fn new(
        config: SmartConfig,
        transport: Arc<dyn HttpTransport>,
        flows: Arc<dyn FlowStateStore>,
        sessions: Arc<SessionIssuer>,
    ) -> SmartResult<Self> {
        config.validate()?;
        let signer = Arc::new(ClientAssertionSigner::from_config(&config)?);
        let flow_ttl = time::Duration::try_from(config.flow.ttl)
            .map_err(|e| SmartError::configuration(format!("flow.ttl out of range: {e}")))?;

        Ok(Self {
            discovery: SmartDiscovery::new(transport.clone()),
            config,
            transport,
            flows,
            sessions,
            signer,
            clients: Arc::new(InMemoryClientRegistry::new()),
            audit: Arc::new(TracingAuditSink),
            flow_ttl,
        })
    }

    /// Replaces the client registry (an empty in-memory one by default).
    #[must_use]
    pub fn with_client_registry(mut self, registry: Arc<dyn ClientRegistry>) -> Self {
        self.clients = registry;
        self
    }

    /// Replaces the assertion signer.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<ClientAssertionSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Configuration the controller runs with.
    #[must_use]
    pub fn config(&self) -> &SmartConfig {
        &self.config
    }

    /// Registry consulted at Init.
    #[must_use]
    pub fn clients(&self) -> &Arc<dyn ClientRegistry> {
        &self.clients
    }

    /// Session issuer shared with the controller.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionIssuer> {
        &self.sessions
    }

    // -------------------------------------------------------------------------
    // Init -> AwaitingCallback
    // -------------------------------------------------------------------------

    /// Starts an attempt and returns where to send the user agent.
    ///
    /// Nothing is persisted unless every check and the discovery succeed.
    ///
    /// # Errors
    ///
    /// `InvalidRequest`, `InsecureEndpoint`, `Discovery`, `UpstreamTimeout`
    /// or `Transport`, wrapped in `Flow { stage: Init }`.
    pub async fn start(&self, request: AuthorizationRequest) -> SmartResult<AuthorizationRedirect> {
        let request = request.merged_with(&self.config);
        let client_id = request.client_id.clone().unwrap_or_default();
        let mut status = FlowStatus::Init;

        let redirect = match self.start_inner(&request).await {
            Ok(redirect) => redirect,
            Err(e) => return Err(self.fail(&mut status, &client_id, AuditAction::Authorize, e)),
        };
        status.advance(FlowStatus::AwaitingCallback)?;

        tracing::debug!(
            flow_id = %redirect.flow_id,
            client_id = %client_id,
            status = ?status,
            "Authorization redirect issued"
        );
        self.audit.record(
            AuditEvent::new(&client_id, AuditAction::Authorize, AuditOutcome::Success)
                .with_details(serde_json::json!({ "flowId": redirect.flow_id })),
        );
        Ok(redirect)
    }

    async fn start_inner(&self, request: &AuthorizationRequest) -> SmartResult<AuthorizationRedirect> {
        let client_id = required(&request.client_id, "client_id")?;
        let scope = required(&request.scope, "scope")?;
        let requested_redirect = required(&request.redirect_uri, "redirect_uri")?;
        let redirect_uri = normalize_redirect_uri(requested_redirect)?;
        let issuer = required(&request.issuer, "issuer")?;

        parse_https(issuer)?;
        self.check_registered_client(client_id, &[requested_redirect, &redirect_uri])
            .await?;

        let endpoints = self.discovery.discover(issuer).await?;
        let token_endpoint = match self.config.token_uri.as_deref() {
            Some(uri) => parse_https(uri)?,
            None => endpoints.token_endpoint,
        };

        let launch_context = request.launch_token().map(|launch| LaunchContext {
            issuer: issuer.to_string(),
            launch: launch.to_string(),
        });

        let flow = FlowState::new(
            NewFlow {
                client_id: client_id.to_string(),
                redirect_uri,
                scope: scope.to_string(),
                issuer: issuer.to_string(),
                token_endpoint,
                launch_context,
            },
            PkceTriple::generate(),
            self.flow_ttl,
        );

        let url = build_authorization_url(endpoints.authorization_endpoint, &flow);
        let redirect = AuthorizationRedirect {
            flow_id: flow.flow_id,
            url,
            expires_at: flow.expires_at,
        };
        self.flows.put(flow).await?;
        Ok(redirect)
    }

    /// Known clients must use a registered redirect URI (as given, or in its
    /// normalized form) and be allowed the authorization code grant. Unknown
    /// clients are registered upstream only.
    async fn check_registered_client(&self, client_id: &str, redirect_uris: &[&str]) -> SmartResult<()> {
        let Some(client) = self.clients.get_client(client_id).await? else {
            return Ok(());
        };
        if !client.is_grant_type_allowed(GrantType::AuthorizationCode) {
            return Err(SmartError::invalid_request(format!(
                "Client {client_id} may not use the authorization_code grant"
            )));
        }
        if !redirect_uris.iter().any(|uri| client.is_redirect_uri_allowed(uri)) {
            return Err(SmartError::invalid_request(format!(
                "redirect_uri is not registered for client {client_id}"
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // AwaitingCallback -> Exchanging -> Completed
    // -------------------------------------------------------------------------

    /// Validates the callback, exchanges the code and issues a session.
    ///
    /// # Errors
    ///
    /// - `FlowNotFound`, `InvalidState`, `MissingCode`, `InvalidRequest`,
    ///   `InsecureEndpoint` wrapped with stage `AwaitingCallback`
    /// - `TokenExchange`, `UpstreamTimeout`, `Transport`, `Configuration`,
    ///   `Signing` wrapped with stage `Exchanging`
    pub async fn complete(&self, callback: CallbackRequest) -> SmartResult<CompletedFlow> {
        let mut status = FlowStatus::AwaitingCallback;
        let flow = match self.accept_callback(&callback).await {
            Ok(flow) => flow,
            Err(e) => {
                return Err(self.fail(
                    &mut status,
                    &principal(callback.flow_id),
                    AuditAction::Authorize,
                    e,
                ));
            }
        };
        let (code, redirect_uri) = match validate_callback_params(&callback, &flow) {
            Ok(params) => params,
            Err(e) => {
                return Err(self.fail(&mut status, &flow.client_id, AuditAction::Authorize, e));
            }
        };

        status.advance(FlowStatus::Exchanging)?;
        tracing::debug!(
            flow_id = %flow.flow_id,
            status = ?status,
            "Callback accepted, exchanging code"
        );

        match self.exchange(&flow, &code, &redirect_uri).await {
            Ok(token) => {
                status.advance(FlowStatus::Completed)?;
                let session = self
                    .sessions
                    .issue_for(token, Some(flow.issuer.clone()));
                tracing::info!(
                    flow_id = %flow.flow_id,
                    client_id = %flow.client_id,
                    status = ?status,
                    "Authorization flow completed"
                );
                self.audit.record(AuditEvent::new(
                    &flow.client_id,
                    AuditAction::Token,
                    AuditOutcome::Success,
                ));
                Ok(CompletedFlow {
                    session,
                    client_id: flow.client_id,
                    launch_context: flow.launch_context,
                    status,
                })
            }
            Err(e) => Err(self.fail(&mut status, &flow.client_id, AuditAction::Token, e)),
        }
    }

    /// Consumes the flow if and only if `state` matches.
    async fn accept_callback(&self, callback: &CallbackRequest) -> SmartResult<FlowState> {
        let flow_id = callback.flow_id.ok_or(SmartError::FlowNotFound)?;
        let Some(state) = callback.state.as_deref() else {
            return Err(SmartError::InvalidState);
        };

        let matches_state = |flow: &FlowState| constant_time_eq(flow.state.as_bytes(), state.as_bytes());
        match self.flows.take_if(&flow_id, &matches_state).await? {
            TakeOutcome::Taken(flow) => Ok(flow),
            TakeOutcome::Rejected => {
                tracing::warn!(flow_id = %flow_id, "Callback state mismatch");
                Err(SmartError::InvalidState)
            }
            TakeOutcome::NotFound => Err(SmartError::FlowNotFound),
        }
    }

    async fn exchange(&self, flow: &FlowState, code: &str, redirect_uri: &str) -> SmartResult<TokenResult> {
        let assertion = if self.signer.is_configured() {
            Some(self.signer.sign(&flow.client_id, flow.token_endpoint.as_str())?)
        } else {
            None
        };

        let request = AuthorizationCodeRequest {
            code,
            redirect_uri,
            client_id: &flow.client_id,
            code_verifier: flow.code_verifier.as_str(),
            client_assertion: assertion.as_deref(),
        };

        tracing::debug!(
            "Exchanging authorization code with token endpoint: {}",
            flow.token_endpoint
        );
        let response = self
            .transport
            .post_form(&flow.token_endpoint, &request.to_form())
            .await?;
        token_result_from_response(response.status, &response.body)
    }

    /// Moves `status` to `Failed`, attributing `err` to the stage it was in.
    fn fail(
        &self,
        status: &mut FlowStatus,
        principal_id: &str,
        action: AuditAction,
        err: SmartError,
    ) -> SmartError {
        let Some(stage) = status.stage() else {
            return err;
        };
        let err = err.in_stage(stage);
        if let Err(e) = status.advance(FlowStatus::Failed) {
            tracing::error!("{}", e);
        }

        if err.is_client_error() {
            tracing::warn!(
                stage = %stage,
                category = %err.category(),
                status = ?status,
                "Authorization flow rejected: {}",
                err
            );
        } else {
            tracing::error!(
                stage = %stage,
                category = %err.category(),
                status = ?status,
                "Authorization flow failed: {}",
                err
            );
        }
        self.audit.record(
            AuditEvent::new(principal_id, action, AuditOutcome::Failure).with_details(
                serde_json::json!({
                    "stage": stage.as_str(),
                    "error": err.root().oauth_error_code(),
                }),
            ),
        );
        err
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn required<'a>(value: &'a Option<String>, name: &str) -> SmartResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SmartError::invalid_request(format!("{name} is required")))
}

fn principal(flow_id: Option<Uuid>) -> String {
    flow_id.map(|id| id.to_string()).unwrap_or_default()
}

/// Appends the authorization request parameters to `endpoint`.
fn build_authorization_url(mut endpoint: Url, flow: &FlowState) -> Url {
    {
        let mut query = endpoint.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &flow.client_id)
            .append_pair("redirect_uri", &flow.redirect_uri)
            .append_pair("scope", &flow.scope)
            .append_pair("state", &flow.state)
            .append_pair("aud", &flow.issuer)
            .append_pair("code_challenge", flow.code_challenge.as_str())
            .append_pair("code_challenge_method", flow.code_challenge_method.as_str());
        if let Some(context) = &flow.launch_context {
            query.append_pair("launch", &context.launch);
        }
    }
    endpoint
}

/// Checks `code`, `error` and the callback URL of an accepted callback.
///
/// Returns the code and the redirect URI recomputed from the callback URL.
fn validate_callback_params(callback: &CallbackRequest, flow: &FlowState) -> SmartResult<(String, String)> {
    let code = match callback.code.as_deref().filter(|c| !c.is_empty()) {
        Some(code) => code.to_string(),
        None => {
            return Err(match &callback.error {
                Some(error) => SmartError::invalid_request(format!(
                    "Authorization server returned error: {error}"
                )),
                None => SmartError::MissingCode,
            });
        }
    };

    let redirect_uri = redirect_uri_of(&callback.callback_url)?;
    if redirect_uri != flow.redirect_uri {
        return Err(SmartError::invalid_request(
            "Callback URL does not match the redirect_uri of the authorization request",
        ));
    }
    Ok((code, redirect_uri))
}

/// Parses a configured redirect URI into the `origin + path` form callbacks
/// are compared against. Query and fragment are not allowed.
fn normalize_redirect_uri(redirect_uri: &str) -> SmartResult<String> {
    let url = parse_https(redirect_uri)?;
    if url.query().is_some() || url.fragment().is_some() {
        return Err(SmartError::invalid_request(
            "redirect_uri must not carry a query or fragment",
        ));
    }
    redirect_uri_of(&url)
}

/// `origin + path` of the callback URL. Must be https.
pub fn redirect_uri_of(callback_url: &Url) -> SmartResult<String> {
    if callback_url.scheme() != "https" {
        return Err(SmartError::insecure_endpoint(format!(
            "{}{}",
            callback_url.origin().ascii_serialization(),
            callback_url.path()
        )));
    }
    Ok(format!(
        "{}{}",
        callback_url.origin().ascii_serialization(),
        callback_url.path()
    ))
}

/// Maps a token endpoint response onto `TokenResult` or `TokenExchange`.
pub(crate) fn token_result_from_response(status: u16, body: &str) -> SmartResult<TokenResult> {
    if !(200..300).contains(&status) {
        if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(body) {
            tracing::warn!(
                "Token endpoint returned {}: {}",
                oauth_error.error,
                oauth_error.error_description.as_deref().unwrap_or("")
            );
        }
        return Err(SmartError::token_exchange(status, body));
    }
    TokenResult::parse(body).map_err(|message| SmartError::token_exchange(status, message))
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

// =============================================================================
// Tests
// =============================================================================
