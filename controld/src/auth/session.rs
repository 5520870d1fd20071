use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tracing::debug;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "controld_session";

#[derive(Clone, Debug)]
pub struct Session {
    pub authenticated: bool,
    last_seen: DateTime<Utc>,
}

/// Server-side sessions keyed by the opaque id stored in the client's cookie.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: TimeDelta,
}

impl SessionStore {
    /// Sessions idle for longer than `ttl` are forgotten.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Whether `id` names a live, authenticated session. A hit refreshes the
    /// session's idle timer.
    pub async fn is_authenticated(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        match sessions.get_mut(id) {
            Some(session) if now - session.last_seen <= self.ttl => {
                session.last_seen = now;
                session.authenticated
            }
            Some(_) => {
                debug!("session expired");
                sessions.remove(id);
                false
            }
            None => false,
        }
    }

    /// Marks the session authenticated and returns its id. A missing or
    /// expired `existing` session is replaced by a new one.
    pub async fn authenticate(&self, existing: Option<&str>) -> String {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        let ttl = self.ttl;
        sessions.retain(|_, s| now - s.last_seen <= ttl);

        if let Some(id) = existing {
            if let Some(session) = sessions.get_mut(id) {
                session.authenticated = true;
                session.last_seen = now;
                return id.to_string();
            }
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        sessions.insert(
            id.clone(),
            Session {
                authenticated: true,
                last_seen: now,
            },
        );
        debug!(sessions = sessions.len(), "session created");
        id
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
