use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::config::ConfigError;
use crate::lifecycle::LifecycleError;
use crate::lifecycle::collaborator::CollaboratorError;
use crate::registry::RegistryError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Lifecycle(e) => match e {
                LifecycleError::Busy => (StatusCode::CONFLICT, "busy"),
                LifecycleError::InvalidTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_transition")
                }
                LifecycleError::TimedOut { .. } => (StatusCode::GATEWAY_TIMEOUT, "timed_out"),
                LifecycleError::TransitionFailed { .. } | LifecycleError::Aborted { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "transition_failed")
                }
            },
            Self::Collaborator(CollaboratorError::NotConfigured(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "not_configured")
            }
            Self::Collaborator(_) => (StatusCode::BAD_GATEWAY, "collaborator_failed"),
            Self::Config(ConfigError::Io(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config_unwritable")
            }
            Self::Config(_) => (StatusCode::BAD_REQUEST, "invalid_config"),
            Self::Registry(RegistryError::UnknownConnection(_)) => {
                (StatusCode::NOT_FOUND, "unknown_connection")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, kind) = self.status_and_kind();
        if status_code.is_server_error() {
            tracing::error!("Generating response for AppError: {:?}", self);
        } else {
            tracing::warn!("Generating response for AppError: {}", self);
        }

        let body = json!({
            "error": kind,
            "message": self.to_string(),
        });
        (status_code, Json(body)).into_response()
    }
}
