//! Sessions issued from successful token exchanges.
//!
//! The [`SessionIssuer`] is the only place sessions are created. Each session
//! belongs to one authorization attempt and is looked up by an opaque random
//! id; there is no process-wide "current token".

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;

use crate::SmartResult;
use crate::config::SessionConfig;
use crate::error::SmartError;
use crate::oauth::TokenResult;
use crate::oauth::pkce::random_urlsafe;

/// Session id entropy in bytes.
const SESSION_ID_BYTES: usize = 32;

/// A bearer credential bound to one completed authorization.
#[derive(Clone, Serialize)]
pub struct Session {
    /// Opaque session id handed to the user agent.
    pub session_id: String,

    /// The access token.
    #[serde(skip_serializing)]
    pub access_token: String,

    /// Token type, normally `Bearer`.
    pub token_type: String,

    /// Granted scope.
    pub scope: Option<String>,

    /// Patient in context.
    pub patient: Option<String>,

    /// Encounter in context.
    pub encounter: Option<String>,

    /// FHIR server the token is good for.
    pub fhir_base_url: Option<String>,

    /// When the session was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// When the access token stops being usable.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("access_token", &"***")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("patient", &self.patient)
            .field("fhir_base_url", &self.fhir_base_url)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    /// Returns `true` if the session is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the session is expired now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Seconds until expiry, zero if already expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.expires_at - OffsetDateTime::now_utc()).max(Duration::ZERO)
    }
}

/// Creates, looks up and revokes sessions.
#[derive(Debug)]
pub struct SessionIssuer {
    sessions: DashMap<String, Session>,
    fallback_ttl: Duration,
    max_ttl: Duration,
    log_tokens: bool,
}

impl SessionIssuer {
    /// Creates an issuer from session configuration.
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        let fallback_ttl = Duration::try_from(config.fallback_ttl)
            .unwrap_or(Duration::seconds(300));
        let max_ttl = Duration::try_from(config.max_ttl).unwrap_or(Duration::days(1));
        Self {
            sessions: DashMap::new(),
            fallback_ttl,
            max_ttl,
            log_tokens: config.log_tokens,
        }
    }

    /// Issues a session for `token`.
    ///
    /// `expires_at` is `now + expires_in`, or `now + fallback_ttl` when the
    /// token response carries no lifetime. Either is capped at `max_ttl`.
    pub fn issue(&self, token: TokenResult) -> Session {
        self.issue_for(token, None)
    }

    /// Issues a session for `token` that targets `fhir_base_url`.
    pub fn issue_for(&self, token: TokenResult, fhir_base_url: Option<String>) -> Session {
        let now = OffsetDateTime::now_utc();
        let lifetime = token
            .expires_in
            .map(|secs| i64::try_from(secs).map_or(self.max_ttl, Duration::seconds))
            .unwrap_or(self.fallback_ttl)
            .min(self.max_ttl);
        if token.expires_in.is_some_and(|secs| secs > self.max_ttl.whole_seconds().unsigned_abs()) {
            tracing::warn!(
                expires_in = token.expires_in,
                max_ttl = self.max_ttl.whole_seconds(),
                "Token lifetime exceeds the session cap, clamping"
            );
        }

        let session = Session {
            session_id: random_urlsafe(SESSION_ID_BYTES),
            access_token: token.access_token,
            token_type: token.token_type,
            scope: token.scope,
            patient: token.patient,
            encounter: token.encounter,
            fhir_base_url,
            issued_at: now,
            expires_at: now.saturating_add(lifetime),
        };

        tracing::info!(
            scope = session.scope.as_deref().unwrap_or(""),
            expires_in = lifetime.whole_seconds(),
            "Issued session"
        );
        if self.log_tokens {
            tracing::debug!(token = %redact(&session.access_token), "Session access token");
        }

        self.sessions
            .insert(session.session_id.clone(), session.clone());
        session
    }

    /// Returns `true` if a session exists for `session_id` and is not expired.
    ///
    /// Never contacts the authorization server.
    #[must_use]
    pub fn validate(&self, session_id: &str) -> bool {
        self.get(session_id).is_ok()
    }

    /// Returns the live session for `session_id`.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for unknown ids, `SessionExpired` for expired ones
    /// (which are evicted).
    pub fn get(&self, session_id: &str) -> SmartResult<Session> {
        let now = OffsetDateTime::now_utc();
        let session = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or(SmartError::SessionNotFound)?;
        if session.is_expired_at(now) {
            self.sessions
                .remove_if(session_id, |_, s| s.is_expired_at(now));
            return Err(SmartError::SessionExpired);
        }
        Ok(session)
    }

    /// Revokes a session. Returns `true` if one was removed.
    pub fn revoke(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Removes expired sessions. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired_at(now));
        before.saturating_sub(self.sessions.len())
    }
}

/// Spawns a task that calls [`SessionIssuer::cleanup_expired`] every
/// `interval` until the handle is aborted.
pub fn spawn_session_sweeper(
    sessions: Arc<SessionIssuer>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired();
            if removed > 0 {
                tracing::debug!(removed, "Swept expired sessions");
            }
        }
    })
}

/// First six characters followed by an ellipsis.
fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}...")
}
