use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use axum_extra::headers::{Authorization, HeaderMapExt};
use axum_extra::headers::authorization::Basic;
use tracing::debug;

use crate::auth::gate::BasicCredentials;
use crate::auth::{GateRequest, SESSION_COOKIE, Verdict};
use crate::error::AppError;
use crate::utils::state::AppState;

/// Runs the session gate in front of every route.
pub async fn session_gate(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let auth = state.config.auth().await;
    let remote_host = remote.ip().to_string();
    // Anything that is not well-formed Basic counts as no credentials.
    let credentials = req.headers().typed_get::<Authorization<Basic>>();
    let verdict = {
        let gate_request = GateRequest {
            method: req.method(),
            path: req.uri().path(),
            remote_host: &remote_host,
            credentials: credentials.as_ref().map(|basic| BasicCredentials {
                username: basic.username(),
                password: basic.password(),
            }),
            session: jar.get(SESSION_COOKIE).map(|cookie| cookie.value()),
        };
        state.gate.check(&gate_request, auth).await
    };
    let outcome = match &verdict {
        Verdict::Allow { .. } => "allow",
        Verdict::Deny => "deny",
        Verdict::Redirect(target) => *target,
    };
    debug!(
        method = %req.method(),
        path = req.uri().path(),
        remote = %remote_host,
        outcome,
        "session gate"
    );

    match verdict {
        Verdict::Allow {
            issued_session: None,
        } => next.run(req).await,
        Verdict::Allow {
            issued_session: Some(id),
        } => {
            let cookie = Cookie::build((SESSION_COOKIE, id))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax);
            (jar.add(cookie), next.run(req).await).into_response()
        }
        Verdict::Deny => AppError::Unauthorized("invalid credentials".to_string()).into_response(),
        Verdict::Redirect(target) => (StatusCode::FOUND, [(LOCATION, target)]).into_response(),
    }
}
