//! Client registration endpoints.
//!
//! - `POST /register` registers a relying party (201 with the stored client)
//! - `DELETE /register/{client_id}` removes it (204, also for unknown ids)
//!
//! The authorization flow only reads the registry; these handlers are the
//! only way it changes.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::SmartState;
use crate::error::SmartError;
use crate::types::ClientRegistration;

/// POST /register handler.
pub async fn register_handler(
    State(state): State<SmartState>,
    Json(registration): Json<ClientRegistration>,
) -> Result<impl IntoResponse, SmartError> {
    let client = state.clients.add_client(registration).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// DELETE /register/{client_id} handler.
pub async fn unregister_handler(
    State(state): State<SmartState>,
    Path(client_id): Path<String>,
) -> Result<StatusCode, SmartError> {
    state.clients.remove_client(&client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
