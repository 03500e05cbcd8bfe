//! # octofhir-smart
//!
//! SMART on FHIR client-side authorization for OctoFHIR applications.
//!
//! This crate provides:
//! - OAuth 2.0 authorization code flow with PKCE (S256)
//! - Standalone and EHR launches
//! - Signed JWT client assertions for confidential clients
//! - Backend services (client_credentials) tokens
//! - Sessions bound to a single completed authorization
//! - A session-authorised FHIR resource client
//!
//! ## Overview
//!
//! An [`AuthorizationFlowController`] discovers the issuer's endpoints,
//! persists per-attempt state in a [`FlowStateStore`], validates the
//! callback and exchanges the code. The resulting token is handed to the
//! [`SessionIssuer`], which is the only source of [`Session`]s.
//!
//! ## Modules
//!
//! - [`config`] - Client configuration
//! - [`oauth`] - PKCE, assertions, discovery and the flow controller
//! - [`storage`] - Flow state store and client registry
//! - [`session`] - Session issuance and lookup
//! - [`resource`] - FHIR resource client and payload envelope
//! - [`http`] - Axum routes for launch, callback and session status
//! - [`audit`] - Audit event emission
//! - [`transport`] - Outbound HTTP seam

pub mod audit;
pub mod config;
pub mod error;
pub mod http;
pub mod oauth;
pub mod resource;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::{ConfigError, FlowConfig, HttpConfig, SessionConfig, SmartConfig};
pub use error::{ErrorCategory, FlowStage, SmartError};
pub use http::{SmartState, smart_router};
pub use oauth::{
    AuthorizationFlowController, AuthorizationRedirect, AuthorizationRequest,
    BackendServicesClient, CallbackRequest, ClientAssertionSigner, CompletedFlow, FlowState,
    FlowStatus, LaunchContext, PkceChallenge, PkceChallengeMethod, PkceTriple, PkceVerifier,
    SigningAlgorithm, SmartDiscovery, TokenResult,
};
pub use resource::{FhirResourceClient, ResourceEnvelope};
pub use session::{Session, SessionIssuer, spawn_session_sweeper};
pub use storage::{
    ClientRegistry, FlowStateStore, InMemoryClientRegistry, InMemoryFlowStateStore, TakeOutcome,
    spawn_flow_sweeper,
};
pub use transport::{HttpTransport, ReqwestTransport, UpstreamResponse};
pub use types::{ClientRegistration, ClientValidationError, GrantType, RegisteredClient};

/// Type alias for SMART client results.
pub type SmartResult<T> = Result<T, SmartError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_smart::prelude::*;
/// ```
pub mod prelude {
    pub use crate::SmartResult;
    pub use crate::config::SmartConfig;
    pub use crate::error::{ErrorCategory, FlowStage, SmartError};
    pub use crate::oauth::{
        AuthorizationFlowController, AuthorizationRequest, BackendServicesClient, CallbackRequest,
        ClientAssertionSigner, PkceTriple, TokenResult,
    };
    pub use crate::resource::{FhirResourceClient, ResourceEnvelope};
    pub use crate::session::{Session, SessionIssuer};
    pub use crate::storage::{FlowStateStore, InMemoryFlowStateStore};
    pub use crate::transport::{HttpTransport, ReqwestTransport};
}
