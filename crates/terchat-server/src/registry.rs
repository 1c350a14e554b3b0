use std::collections::HashMap;
use std::sync::Arc;

use terchat_shared::{Record, UserId};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::ConnectionHandle;

/// Which identities are online, and on which connection.
///
/// At most one connection per identity. Entries are keyed by identity but
/// removal also checks the connection id, so a session that was replaced by a
/// newer login never removes its successor's entry.
#[derive(Clone, Default)]
pub struct Registry {
    online: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `id` to `handle`. Returns the connection it replaced, if that was
    /// a different one; the caller is responsible for closing it.
    pub async fn set_online(&self, id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn_id = handle.id();
        let previous = self.online.write().await.insert(id, handle);
        let evicted = previous.filter(|prev| prev.id() != conn_id);

        info!(
            user = %id,
            conn = %conn_id,
            replaced = evicted.is_some(),
            "User online"
        );
        evicted
    }

    pub async fn lookup(&self, id: UserId) -> Option<ConnectionHandle> {
        self.online.read().await.get(&id).cloned()
    }

    /// Remove `id` if it is still mapped to `conn_id`.
    pub async fn remove(&self, id: UserId, conn_id: Uuid) -> bool {
        let mut online = self.online.write().await;
        match online.get(&id) {
            Some(handle) if handle.id() == conn_id => {
                online.remove(&id);
                info!(user = %id, conn = %conn_id, "User offline");
                true
            }
            _ => {
                debug!(user = %id, conn = %conn_id, "Stale registry removal ignored");
                false
            }
        }
    }

    pub async fn is_online(&self, id: UserId) -> bool {
        self.online.read().await.contains_key(&id)
    }

    /// Online identities in ascending order.
    pub async fn online(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.online.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.online.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.online.read().await.is_empty()
    }

    /// Send `Disconnect` to every online connection and close it. Returns the
    /// number of connections notified.
    pub async fn shutdown_all(&self) -> usize {
        let drained: Vec<(UserId, ConnectionHandle)> = self.online.write().await.drain().collect();

        for (id, handle) in &drained {
            if handle.try_send(Record::disconnect()).is_err() {
                debug!(user = %id, conn = %handle.id(), "Disconnect not queued, connection already closing");
            }
            handle.close();
        }

        info!(count = drained.len(), "Disconnected all online users");
        drained.len()
    }
}
