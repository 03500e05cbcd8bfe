//! SMART on FHIR OAuth 2.0 client.
//!
//! - [`pkce`] - verifier, challenge and state generation
//! - [`assertion`] - signed JWT client assertions
//! - [`discovery`] - `.well-known/smart-configuration` lookup
//! - [`flow`] - per-attempt flow state
//! - [`controller`] - authorization code flow state machine
//! - [`backend`] - client_credentials for backend services
//! - [`token`] - token endpoint requests and responses

pub mod assertion;
pub mod backend;
pub mod controller;
pub mod discovery;
pub mod flow;
pub mod pkce;
pub mod token;

pub use assertion::{
    ASSERTION_LIFETIME_SECS, CLIENT_ASSERTION_TYPE, ClientAssertionClaims, ClientAssertionSigner,
    SigningAlgorithm,
};
pub use backend::BackendServicesClient;
pub use controller::{
    AuthorizationFlowController, AuthorizationRedirect, AuthorizationRequest, CallbackRequest,
    CompletedFlow, redirect_uri_of,
};
pub use discovery::{SmartConfigurationDocument, SmartDiscovery, SmartEndpoints};
pub use flow::{FlowState, FlowStatus, LaunchContext, NewFlow};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceTriple, PkceVerifier};
pub use token::{AuthorizationCodeRequest, TokenResult};
