//! Launch, authorize, callback and session handlers.
//!
//! ```text
//! GET /launch?iss&launch ─┐
//!                         ├─► start flow ─► set smart_flow ─► 303 to authorization server
//! GET /authorize ─────────┘
//!
//! GET /callback?code&state ─► read smart_flow ─► complete flow
//!                           ─► set smart_session, clear smart_flow ─► session summary
//! ```

use axum::Json;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use super::SmartState;
use super::cookies::{
    FLOW_COOKIE_NAME, SESSION_COOKIE_NAME, flow_cookie, removal_cookie, session_cookie,
};
use crate::SmartResult;
use crate::error::SmartError;
use crate::oauth::{AuthorizationRequest, CallbackRequest};
use crate::session::Session;

/// Query of an EHR launch.
#[derive(Debug, Deserialize)]
pub struct LaunchParams {
    /// Issuer the EHR launched us against.
    pub iss: Option<String>,
    /// Opaque launch token.
    pub launch: Option<String>,
}

/// Session summary returned to the user agent. Never carries the token.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Whether the session is usable.
    pub active: bool,
    /// Expiry of the access token.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// Granted scope.
    pub scope: Option<String>,
    /// Patient in context.
    pub patient: Option<String>,
    /// Encounter in context.
    pub encounter: Option<String>,
    /// FHIR server the token is good for.
    pub fhir_base_url: Option<String>,
}

impl SessionSummary {
    fn inactive() -> Self {
        Self {
            active: false,
            expires_at: None,
            scope: None,
            patient: None,
            encounter: None,
            fhir_base_url: None,
        }
    }
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            active: true,
            expires_at: Some(session.expires_at),
            scope: session.scope.clone(),
            patient: session.patient.clone(),
            encounter: session.encounter.clone(),
            fhir_base_url: session.fhir_base_url.clone(),
        }
    }
}

/// GET /launch handler (EHR launch).
pub async fn launch_handler(
    State(state): State<SmartState>,
    Query(params): Query<LaunchParams>,
    jar: CookieJar,
) -> Result<Response, SmartError> {
    let iss = params
        .iss
        .filter(|iss| !iss.trim().is_empty())
        .ok_or_else(|| SmartError::invalid_request("iss is required"))?;

    let request = AuthorizationRequest {
        issuer: Some(iss),
        launch: params.launch,
        ..Default::default()
    };
    start(&state, request, jar).await
}

/// GET /authorize handler (standalone launch).
pub async fn authorize_handler(
    State(state): State<SmartState>,
    Query(request): Query<AuthorizationRequest>,
    jar: CookieJar,
) -> Result<Response, SmartError> {
    start(&state, request, jar).await
}

async fn start(
    state: &SmartState,
    request: AuthorizationRequest,
    jar: CookieJar,
) -> Result<Response, SmartError> {
    let redirect = state.controller.start(request).await?;
    let jar = jar.add(flow_cookie(
        redirect.flow_id,
        &state.cookie_path,
        state.flow_ttl,
    ));
    Ok((jar, Redirect::to(redirect.url.as_str())).into_response())
}

/// GET /callback handler.
///
/// The flow cookie is cleared whatever the outcome, except on a `state`
/// mismatch: the stored flow survives that, so the cookie pointing at it does
/// too.
pub async fn callback_handler(
    State(state): State<SmartState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let flow_id = jar
        .get(FLOW_COOKIE_NAME)
        .and_then(|c| Uuid::parse_str(c.value()).ok());

    let result = match external_url(&headers, &uri, state.trust_proxy) {
        Ok(callback_url) => {
            state
                .controller
                .complete(CallbackRequest::from_url(flow_id, callback_url))
                .await
        }
        Err(e) => Err(e),
    };

    let completed = match result {
        Ok(completed) => completed,
        Err(e) if matches!(e.root(), SmartError::InvalidState) => return e.into_response(),
        Err(e) => {
            let jar = jar.remove(removal_cookie(FLOW_COOKIE_NAME, &state.cookie_path));
            return (jar, e).into_response();
        }
    };

    let session = &completed.session;
    let jar = jar
        .remove(removal_cookie(FLOW_COOKIE_NAME, &state.cookie_path))
        .add(session_cookie(
            &session.session_id,
            &state.cookie_path,
            session.remaining(),
        ));
    (jar, Json(SessionSummary::from(session))).into_response()
}

/// GET /session handler.
pub async fn session_handler(State(state): State<SmartState>, jar: CookieJar) -> Json<SessionSummary> {
    let summary = jar
        .get(SESSION_COOKIE_NAME)
        .and_then(|c| state.sessions.get(c.value()).ok())
        .map(|session| SessionSummary::from(&session))
        .unwrap_or_else(SessionSummary::inactive);
    Json(summary)
}

/// Rebuilds the URL the user agent requested.
///
/// With `trust_proxy`, scheme and host come from `X-Forwarded-Proto` /
/// `X-Forwarded-Host` when present. Otherwise those headers are ignored and
/// the URL is built from the request URI and `Host`.
pub fn external_url(headers: &HeaderMap, uri: &Uri, trust_proxy: bool) -> SmartResult<Url> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let forwarded = |name: &str| if trust_proxy { header(name) } else { None };

    let scheme = forwarded("x-forwarded-proto")
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");
    let host = forwarded("x-forwarded-host")
        .or_else(|| header("host"))
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .ok_or_else(|| SmartError::invalid_request("Cannot determine request host"))?;
    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    Url::parse(&format!("{scheme}://{host}{path_and_query}"))
        .map_err(|e| SmartError::invalid_request(format!("Invalid request URL: {e}")))
}
