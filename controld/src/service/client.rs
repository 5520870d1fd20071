use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use crate::error::AppError;
use crate::registry::{ClientType, ConnectionId};
use crate::utils::state::AppState;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClientTypeRequest {
    connection_id: ConnectionId,
    client_type: ClientType,
}

/// Tags the caller's socket connection, identified by the id it received in
/// its `connectionId` event.
pub async fn set_client_type(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClientTypeRequest>,
) -> Result<StatusCode, AppError> {
    state
        .registry
        .set_client_type(req.connection_id, req.client_type)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
