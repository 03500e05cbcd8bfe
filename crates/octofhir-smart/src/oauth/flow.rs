//! Per-attempt authorization flow state.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use url::Url;
use uuid::Uuid;

use super::pkce::{PkceChallenge, PkceChallengeMethod, PkceTriple, PkceVerifier};
use crate::SmartResult;
use crate::error::{FlowStage, SmartError};

/// Default flow lifetime in seconds.
pub const DEFAULT_FLOW_TTL_SECS: i64 = 300;

/// Lifecycle of an authorization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Inputs received, nothing persisted yet.
    Init,
    /// Redirect issued; waiting for the authorization server to call back.
    AwaitingCallback,
    /// Callback accepted; code being exchanged.
    Exchanging,
    /// Token obtained and session issued.
    Completed,
    /// Terminal failure; a new attempt must start from `Init`.
    Failed,
}

impl FlowStatus {
    /// Returns `true` for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: FlowStatus) -> bool {
        match (self, next) {
            (Self::Init, Self::AwaitingCallback)
            | (Self::AwaitingCallback, Self::Exchanging)
            | (Self::Exchanging, Self::Completed) => true,
            (current, Self::Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Moves to `next`, refusing transitions the state machine does not have.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` naming both states; `self` is left unchanged.
    pub fn advance(&mut self, next: FlowStatus) -> SmartResult<()> {
        if !self.can_transition_to(next) {
            return Err(SmartError::invalid_request(format!(
                "Illegal flow transition {self:?} -> {next:?}"
            )));
        }
        *self = next;
        Ok(())
    }

    /// Stage errors raised in this state are attributed to. `None` once
    /// terminal.
    #[must_use]
    pub fn stage(&self) -> Option<FlowStage> {
        match self {
            Self::Init => Some(FlowStage::Init),
            Self::AwaitingCallback => Some(FlowStage::AwaitingCallback),
            Self::Exchanging => Some(FlowStage::Exchanging),
            Self::Completed | Self::Failed => None,
        }
    }
}

/// Issuer and opaque launch token of an EHR-initiated launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchContext {
    /// Issuer the EHR launched us against.
    pub issuer: String,
    /// Opaque launch token forwarded to the authorization endpoint.
    pub launch: String,
}

/// State of one in-flight authorization attempt.
///
/// Keyed by `flow_id`, which the user agent only ever sees inside an
/// HttpOnly cookie. Removed when the callback consumes it or when it expires.
#[derive(Debug, Clone)]
pub struct FlowState {
    /// Correlation id (lookup key).
    pub flow_id: Uuid,
    /// Client the flow was started for.
    pub client_id: String,
    /// Redirect URI sent in the authorization request.
    pub redirect_uri: String,
    /// PKCE secret.
    pub code_verifier: PkceVerifier,
    /// Challenge derived from `code_verifier`.
    pub code_challenge: PkceChallenge,
    /// Challenge method (S256).
    pub code_challenge_method: PkceChallengeMethod,
    /// Anti-CSRF state.
    pub state: String,
    /// Requested scope.
    pub scope: String,
    /// Issuer (also the `aud` of the authorization request).
    pub issuer: String,
    /// Token endpoint resolved at init.
    pub token_endpoint: Url,
    /// EHR launch context, when the flow was started by an EHR.
    pub launch_context: Option<LaunchContext>,
    /// When the flow was started.
    pub created_at: OffsetDateTime,
    /// When the flow stops being valid.
    pub expires_at: OffsetDateTime,
}

/// Inputs of a new flow, everything except the generated secrets.
#[derive(Debug, Clone)]
pub struct NewFlow {
    /// Client id.
    pub client_id: String,
    /// Redirect URI.
    pub redirect_uri: String,
    /// Scope.
    pub scope: String,
    /// Issuer.
    pub issuer: String,
    /// Token endpoint resolved at init.
    pub token_endpoint: Url,
    /// EHR launch context.
    pub launch_context: Option<LaunchContext>,
}

impl FlowState {
    /// Creates a flow with a fresh id and PKCE triple, valid for `ttl`.
    #[must_use]
    pub fn new(input: NewFlow, pkce: PkceTriple, ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            flow_id: Uuid::new_v4(),
            client_id: input.client_id,
            redirect_uri: input.redirect_uri,
            code_verifier: pkce.verifier,
            code_challenge: pkce.challenge,
            code_challenge_method: pkce.method,
            state: pkce.state,
            scope: input.scope,
            issuer: input.issuer,
            token_endpoint: input.token_endpoint,
            launch_context: input.launch_context,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns `true` if the flow is expired at `now`.
    ///
    /// A flow is already expired at the exact instant of `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the flow is expired now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}
