use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use octofhir_smart::{
    AuthorizationFlowController, ClientRegistry, FlowStateStore, InMemoryClientRegistry,
    InMemoryFlowStateStore, ReqwestTransport, SessionIssuer, SmartConfig, SmartState,
    smart_router, spawn_flow_sweeper, spawn_session_sweeper,
};
use tower_http::trace::TraceLayer;

pub async fn serve(cfg: SmartConfig, addr: SocketAddr) -> Result<()> {
    let transport = Arc::new(ReqwestTransport::new(cfg.http.timeout)?);
    let flows: Arc<dyn FlowStateStore> = Arc::new(InMemoryFlowStateStore::new());
    let sessions = Arc::new(SessionIssuer::new(&cfg.session));
    let clients: Arc<dyn ClientRegistry> = Arc::new(InMemoryClientRegistry::new());
    let flow_sweeper = spawn_flow_sweeper(flows.clone(), cfg.flow.sweep_interval);
    let session_sweeper = spawn_session_sweeper(sessions.clone(), cfg.session.sweep_interval);

    let controller = AuthorizationFlowController::new(cfg, transport, flows, sessions)
        .context("Failed to initialise the authorization flow")?
        .with_client_registry(clients);
    let state = SmartState::new(Arc::new(controller))?;
    let app = smart_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    flow_sweeper.abort();
    session_sweeper.abort();
    Ok(())
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
