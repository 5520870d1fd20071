use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::Value;

use crate::config::ControlConfig;
use crate::error::AppError;
use crate::utils::state::AppState;

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ControlConfig> {
    Json(state.config.get().await)
}

/// Applies a JSON merge-patch and returns the resulting configuration.
pub async fn set_config(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<Value>,
) -> Result<Json<ControlConfig>, AppError> {
    Ok(Json(state.config.apply_patch(patch).await?))
}
