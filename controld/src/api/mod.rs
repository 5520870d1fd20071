pub mod middleware;
pub mod socket;

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::service::{client, config, control};
use crate::utils::state::AppState;
use middleware::session_gate;
use socket::socket_handler;

/// Builds the gateway. Every route, the socket upgrade and the static web
/// root all sit behind the session gate.
pub fn create_router(state: Arc<AppState>, web_root: Option<&Path>) -> Router {
    let mut router = Router::new()
        .nest("/config", config_router())
        .nest("/control", control_router())
        .nest("/client", client_router())
        .route("/socket", get(socket_handler))
        .route("/socket/", get(socket_handler));

    if let Some(root) = web_root {
        router = router.fallback_service(ServeDir::new(root));
    }

    router
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            session_gate,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn config_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/get", get(config::get_config))
        .route("/set", post(config::set_config))
}

fn control_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(control::start))
        .route("/stop", post(control::stop))
        .route("/restart", post(control::restart))
        .route("/update", post(control::update))
        .route("/version", get(control::version))
        .route("/controlVersion", get(control::control_version))
        .route("/status", get(control::status))
        .route("/pdbBranches", get(control::pdb_branches))
        .route("/puiBranches", get(control::pui_branches))
}

fn client_router() -> Router<Arc<AppState>> {
    Router::new().route("/type", post(client::set_client_type))
}
