pub mod crud;
pub mod search;
pub mod serve;
pub mod token;

use std::sync::Arc;

use anyhow::{Context, Result};
use octofhir_smart::{
    BackendServicesClient, FhirResourceClient, ReqwestTransport, Session, SessionIssuer,
    SmartConfig,
};

/// A backend-services session plus a resource client for the FHIR server.
pub struct ResourceContext {
    pub client: FhirResourceClient,
    pub session: Session,
}

impl ResourceContext {
    /// Obtains a client_credentials token and opens a session with it.
    pub async fn connect(cfg: &SmartConfig) -> Result<Self> {
        let base_url = cfg
            .fhir_base_url
            .as_deref()
            .or_else(|| cfg.issuer())
            .context("FHIR_BASE_URL or SMART_ISS is required")?;

        let session = backend_session(cfg, None).await?;
        let client = FhirResourceClient::new(base_url, cfg.http.timeout)?;
        Ok(Self { client, session })
    }
}

/// Requests a backend-services token and binds it to a new session.
pub async fn backend_session(cfg: &SmartConfig, scope: Option<&str>) -> Result<Session> {
    let transport = Arc::new(ReqwestTransport::new(cfg.http.timeout)?);
    let backend = BackendServicesClient::new(cfg, transport)?;
    let token = backend
        .request_token(scope)
        .await
        .context("Backend services authorization failed")?;

    let sessions = SessionIssuer::new(&cfg.session);
    Ok(sessions.issue_for(token, cfg.issuer().map(str::to_string)))
}
