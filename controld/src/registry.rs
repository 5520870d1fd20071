use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

/// Events a connection may have queued before it is considered too slow and
/// dropped from the registry.
pub const QUEUE_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    #[serde(alias = "BROWSER")]
    Browser,
    #[serde(alias = "BENCHMARKER")]
    Benchmarker,
    #[default]
    #[serde(alias = "UNKNOWN")]
    Unknown,
}

/// A named server-originated message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Event {
    pub event: String,
    pub payload: String,
}

impl Event {
    pub fn new(event: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
        }
    }
}

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

#[derive(Debug)]
struct ClientEntry {
    client_type: ClientType,
    connected_at: DateTime<Utc>,
    sender: EventSender,
}

/// Live real-time connections. Every connection owns a bounded queue drained
/// in order by its own writer task, so a broadcast never waits on a socket.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<ConnectionId, ClientEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue suitable for [`ConnectionRegistry::add_client`].
    pub fn channel() -> (EventSender, EventReceiver) {
        mpsc::channel(QUEUE_CAPACITY)
    }

    pub async fn add_client(&self, sender: EventSender) -> ConnectionId {
        let mut clients = self.clients.write().await;
        let mut id = ConnectionId::generate();
        while clients.contains_key(&id) {
            id = ConnectionId::generate();
        }
        clients.insert(
            id,
            ClientEntry {
                client_type: ClientType::Unknown,
                connected_at: Utc::now(),
                sender,
            },
        );
        debug!(connection = %id, total = clients.len(), "client connected");
        id
    }

    /// Returns whether the connection was still registered.
    pub async fn remove_client(&self, id: ConnectionId) -> bool {
        let mut clients = self.clients.write().await;
        match clients.remove(&id) {
            Some(entry) => {
                let lifetime = Utc::now() - entry.connected_at;
                debug!(
                    connection = %id,
                    seconds = lifetime.num_seconds(),
                    "client disconnected"
                );
                true
            }
            None => false,
        }
    }

    pub async fn set_client_type(
        &self,
        id: ConnectionId,
        client_type: ClientType,
    ) -> Result<(), RegistryError> {
        let mut clients = self.clients.write().await;
        let entry = clients
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        entry.client_type = client_type;
        debug!(connection = %id, ?client_type, "client type set");
        Ok(())
    }

    pub async fn client_type(&self, id: ConnectionId) -> Option<ClientType> {
        self.clients.read().await.get(&id).map(|e| e.client_type)
    }

    pub async fn benchmarker_connected(&self) -> bool {
        self.clients
            .read()
            .await
            .values()
            .any(|e| e.client_type == ClientType::Benchmarker)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Queues one event for a single connection.
    pub async fn send_to(&self, id: ConnectionId, event: Event) -> bool {
        let sender = match self.clients.read().await.get(&id) {
            Some(entry) => entry.sender.clone(),
            None => return false,
        };
        if sender.try_send(event).is_ok() {
            return true;
        }
        self.remove_client(id).await;
        false
    }

    /// Queues `event` for every registered connection and returns how many
    /// accepted it. Connections whose queue is closed or full are dropped
    /// after the pass; none of this is reported to the caller.
    pub async fn broadcast(&self, event: &str, payload: &str) -> usize {
        let targets: Vec<(ConnectionId, EventSender)> = self
            .clients
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.sender.clone()))
            .collect();

        let message = Event::new(event, payload);
        let mut delivered = 0;
        let mut stale = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(connection = %id, "client is not keeping up, dropping it");
                    stale.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %id, "client connection is gone, dropping it");
                    stale.push(id);
                }
            }
        }

        if !stale.is_empty() {
            let mut clients = self.clients.write().await;
            for id in stale {
                clients.remove(&id);
            }
        }
        delivered
    }
}
