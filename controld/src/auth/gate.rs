use std::net::IpAddr;
use std::sync::Arc;

use axum::http::Method;

use super::credentials::CredentialStore;
use super::session::SessionStore;
use crate::config::AuthConfig;

pub const LOGIN_PAGE: &str = "/login.html";
pub const ROOT: &str = "/";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BasicCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// What the gate needs to know about an inbound request.
#[derive(Clone, Copy, Debug)]
pub struct GateRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub remote_host: &'a str,
    pub credentials: Option<BasicCredentials<'a>>,
    pub session: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Continue to routing. `issued_session` is set when a new session was
    /// created for the caller and has to be handed back as a cookie.
    Allow { issued_session: Option<String> },
    /// Respond 401 and stop.
    Deny,
    Redirect(&'static str),
}

impl Verdict {
    pub const fn allow() -> Self {
        Self::Allow {
            issued_session: None,
        }
    }
}

pub struct SessionGate {
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<SessionStore>,
}

impl SessionGate {
    pub fn new(credentials: Arc<dyn CredentialStore>, sessions: Arc<SessionStore>) -> Self {
        Self {
            credentials,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Decides whether `request` may reach the control API. Marking the
    /// caller's session authenticated after a successful credential check is
    /// the only side effect.
    pub async fn check(&self, request: &GateRequest<'_>, auth: AuthConfig) -> Verdict {
        if !auth.enabled {
            if request.path == LOGIN_PAGE {
                return Verdict::Redirect(ROOT);
            }
            return Verdict::allow();
        }

        // The login page and its assets must load before anyone is signed in,
        // but only for reads.
        if is_safe(request.method) && is_login_resource(request.path) {
            return Verdict::allow();
        }

        if is_local_host(request.remote_host) && !auth.required_for_local_clients {
            return Verdict::allow();
        }

        if let Some(BasicCredentials { username, password }) = request.credentials {
            if !self.credentials.verify(username, password).await {
                return Verdict::Deny;
            }
            let id = self.sessions.authenticate(request.session).await;
            let issued_session = (request.session != Some(id.as_str())).then_some(id);
            return Verdict::Allow { issued_session };
        }

        if let Some(id) = request.session {
            if self.sessions.is_authenticated(id).await {
                return Verdict::allow();
            }
        }

        Verdict::Redirect(LOGIN_PAGE)
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD)
}

fn is_login_resource(path: &str) -> bool {
    path == LOGIN_PAGE || path.ends_with(".css") || path.ends_with(".js")
}

/// `localhost` or any loopback address, including IPv4-mapped IPv6 ones.
pub fn is_local_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .is_ok_and(|ip| ip.to_canonical().is_loopback())
}
