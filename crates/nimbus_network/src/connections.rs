//! Table of live connections held by the manager.

use crate::connection::{Connection, ConnectionId};
use crate::packet::Notification;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Live connections keyed by id. Closed connections remove themselves.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tracks `connection` until it closes.
    pub fn insert(self: &Arc<Self>, connection: Connection) {
        let id = connection.id();
        self.connections.insert(id, connection.clone());
        debug!(connection = %id, total = self.connections.len(), "Connection tracked");

        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            connection.closed().await;
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        });
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id).map(|(_, connection)| connection);
        if removed.is_some() {
            debug!(connection = %id, "Connection untracked");
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn open_connections(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_open())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Sends a notification to every open connection except `except`.
    ///
    /// Returns how many connections accepted it.
    pub fn broadcast(&self, packet: &str, payload: &Value, except: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for connection in self.open_connections() {
            if Some(connection.id()) == except {
                continue;
            }
            match connection.notify(packet, payload.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => warn!(connection = %connection.id(), packet, "Broadcast skipped: {}", err),
            }
        }
        delivered
    }

    /// Typed form of [`broadcast`](Self::broadcast).
    pub fn broadcast_notification<N: Notification>(
        &self,
        notification: &N,
        except: Option<ConnectionId>,
    ) -> usize {
        match serde_json::to_value(notification) {
            Ok(payload) => self.broadcast(N::NAME, &payload, except),
            Err(err) => {
                warn!(packet = N::NAME, "Failed to encode broadcast: {}", err);
                0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DEFAULT_REQUEST_TIMEOUT;
    use crate::packet::Frame;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_broadcast_skips_origin_and_closed_connections() {
        let registry = ConnectionRegistry::new();
        let (origin, mut origin_rx) = Connection::new("origin", DEFAULT_REQUEST_TIMEOUT);
        let (other, mut other_rx) = Connection::new("other", DEFAULT_REQUEST_TIMEOUT);
        registry.insert(origin.clone());
        registry.insert(other.clone());
        assert_eq!(registry.len(), 2);

        let delivered = registry.broadcast("service.update", &json!({ "name": "lobby-1" }), Some(origin.id()));
        assert_eq!(delivered, 1);
        assert!(matches!(other_rx.recv().await, Some(Frame::Notification { .. })));
        assert!(origin_rx.try_recv().is_err());

        other.close();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.len(), 1);
        assert!(registry.get(other.id()).is_none());
    }
}
