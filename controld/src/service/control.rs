use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::AppError;
use crate::lifecycle::StatusSnapshot;
use crate::utils::state::AppState;

#[derive(Serialize)]
pub struct VersionResponse {
    version: String,
}

pub async fn start(State(state): State<Arc<AppState>>) -> Result<Json<StatusSnapshot>, AppError> {
    Ok(Json(state.lifecycle.start().await?))
}

pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<StatusSnapshot>, AppError> {
    Ok(Json(state.lifecycle.stop().await?))
}

pub async fn restart(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusSnapshot>, AppError> {
    Ok(Json(state.lifecycle.restart().await?))
}

/// Builds the branches currently selected in the configuration.
pub async fn update(State(state): State<Arc<AppState>>) -> Result<Json<StatusSnapshot>, AppError> {
    let branches = state.config.get().await.branches;
    Ok(Json(state.lifecycle.update(branches).await?))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.lifecycle.status())
}

pub async fn version(State(state): State<Arc<AppState>>) -> Result<Json<VersionResponse>, AppError> {
    let version = state.lifecycle.version().await?;
    Ok(Json(VersionResponse { version }))
}

pub async fn control_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn pdb_branches(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, AppError> {
    let repository = state.config.get().await.repositories.pdb;
    Ok(Json(state.builder.branches(&repository).await?))
}

pub async fn pui_branches(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, AppError> {
    let repository = state.config.get().await.repositories.pui;
    Ok(Json(state.builder.branches(&repository).await?))
}
