//! HTTP front for the SMART authorization flow.
//!
//! # Routes
//!
//! - `GET /launch` - EHR launch ([`handlers::launch_handler`])
//! - `GET /authorize` - standalone launch ([`handlers::authorize_handler`])
//! - `GET /callback` - redirect target ([`handlers::callback_handler`])
//! - `GET /session` - session status ([`handlers::session_handler`])
//! - `POST /register` - client registration ([`register::register_handler`])
//! - `DELETE /register/{client_id}` - client removal
//!   ([`register::unregister_handler`])

pub mod cookies;
pub mod error;
pub mod handlers;
pub mod register;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use crate::SmartResult;
use crate::error::SmartError;
use crate::oauth::AuthorizationFlowController;
use crate::session::SessionIssuer;
use crate::storage::ClientRegistry;

pub use error::operation_outcome_json;
pub use handlers::{SessionSummary, external_url};

/// State shared by the SMART handlers.
#[derive(Clone)]
pub struct SmartState {
    /// Flow controller.
    pub controller: Arc<AuthorizationFlowController>,
    /// Session issuer used by `/session`.
    pub sessions: Arc<SessionIssuer>,
    /// Registry behind `/register`, shared with the controller.
    pub clients: Arc<dyn ClientRegistry>,
    /// Whether `X-Forwarded-*` headers are honoured on `/callback`.
    pub trust_proxy: bool,
    /// Max-age of the flow cookie.
    pub flow_ttl: time::Duration,
    /// Path attribute of both cookies.
    pub cookie_path: String,
}

impl SmartState {
    /// Builds handler state from a controller and its configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the flow TTL does not fit a cookie
    /// max-age.
    pub fn new(controller: Arc<AuthorizationFlowController>) -> SmartResult<Self> {
        let config = controller.config();
        let flow_ttl = time::Duration::try_from(config.flow.ttl)
            .map_err(|e| SmartError::configuration(format!("flow.ttl out of range: {e}")))?;
        Ok(Self {
            sessions: controller.sessions().clone(),
            clients: controller.clients().clone(),
            trust_proxy: config.trust_proxy,
            cookie_path: config.session.cookie_path.clone(),
            flow_ttl,
            controller,
        })
    }
}

/// Router with the SMART launch, callback and session routes.
pub fn smart_router(state: SmartState) -> Router {
    Router::new()
        .route("/launch", get(handlers::launch_handler))
        .route("/authorize", get(handlers::authorize_handler))
        .route("/callback", get(handlers::callback_handler))
        .route("/session", get(handlers::session_handler))
        .route("/register", post(register::register_handler))
        .route("/register/{client_id}", delete(register::unregister_handler))
        .with_state(state)
}
