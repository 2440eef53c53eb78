//! Packet handlers and the registry that names them.

use crate::connection::Connection;
use crate::error::CommunicationError;
use crate::packet::{Notification, Packet, Payload};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Consumes one received packet and produces its outcome.
///
/// Handlers may suspend freely; each invocation runs on its own task. For
/// fire-and-forget packets the success value is discarded.
#[async_trait]
pub trait PacketHandler: Send + Sync {
    async fn handle(&self, connection: &Connection, payload: Payload) -> Result<Value, CommunicationError>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> PacketHandler for FnHandler<F>
where
    F: Fn(Connection, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, CommunicationError>> + Send + 'static,
{
    async fn handle(&self, connection: &Connection, payload: Payload) -> Result<Value, CommunicationError> {
        (self.f)(connection.clone(), payload).await
    }
}

/// Packet name → handler table shared by every connection of a node.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn PacketHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, returning the one it replaced.
    pub fn register<H>(&self, packet: impl Into<String>, handler: H) -> Option<Arc<dyn PacketHandler>>
    where
        H: PacketHandler + 'static,
    {
        let packet = packet.into();
        debug!(packet = %packet, "📝 Registering packet handler");
        self.handlers.insert(packet, Arc::new(handler))
    }

    /// Registers an async closure over the raw payload.
    pub fn register_fn<F, Fut>(&self, packet: impl Into<String>, f: F) -> Option<Arc<dyn PacketHandler>>
    where
        F: Fn(Connection, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CommunicationError>> + Send + 'static,
    {
        self.register(packet, FnHandler { f })
    }

    /// Registers a typed request handler under `P::NAME`.
    ///
    /// A payload that does not decode as `P` is answered with
    /// [`CommunicationError::MissingContent`] before `f` is called.
    pub fn register_packet<P, F, Fut>(&self, f: F) -> Option<Arc<dyn PacketHandler>>
    where
        P: Packet,
        F: Fn(Connection, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P::Response, CommunicationError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.register_fn(P::NAME, move |connection, payload: Payload| {
            let f = Arc::clone(&f);
            async move {
                let packet: P = payload.decode()?;
                let response = f(connection, packet).await?;
                serde_json::to_value(response).map_err(|e| CommunicationError::internal(e.to_string()))
            }
        })
    }

    /// Registers a typed fire-and-forget handler under `N::NAME`.
    pub fn register_notification<N, F, Fut>(&self, f: F) -> Option<Arc<dyn PacketHandler>>
    where
        N: Notification,
        F: Fn(Connection, N) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CommunicationError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.register_fn(N::NAME, move |connection, payload: Payload| {
            let f = Arc::clone(&f);
            async move {
                let notification: N = payload.decode()?;
                f(connection, notification).await?;
                Ok::<Value, CommunicationError>(Value::Null)
            }
        })
    }

    pub fn unregister(&self, packet: &str) -> Option<Arc<dyn PacketHandler>> {
        self.handlers.remove(packet).map(|(_, handler)| handler)
    }

    pub fn get(&self, packet: &str) -> Option<Arc<dyn PacketHandler>> {
        self.handlers.get(packet).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, packet: &str) -> bool {
        self.handlers.contains_key(packet)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered packet names, sorted.
    pub fn packet_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DEFAULT_REQUEST_TIMEOUT;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    impl Packet for Add {
        const NAME: &'static str = "math.add";
        type Response = i64;
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_and_encodes() {
        let registry = HandlerRegistry::new();
        registry.register_packet(|_connection, add: Add| async move { Ok(add.a + add.b) });
        assert!(registry.contains("math.add"));

        let (connection, _outbound) = Connection::new("test", DEFAULT_REQUEST_TIMEOUT);
        let handler = registry.get("math.add").unwrap();

        let sum = handler
            .handle(&connection, Payload::new(json!({ "a": 2, "b": 3 })))
            .await;
        assert_eq!(sum, Ok(json!(5)));

        let missing = handler.handle(&connection, Payload::new(json!({ "a": 2 }))).await;
        assert_eq!(missing, Err(CommunicationError::missing_content("b")));
    }

    #[test]
    fn test_register_replaces_and_unregister_removes() {
        let registry = HandlerRegistry::new();
        assert!(registry
            .register_fn("ping", |_, _| async { Ok(json!("pong")) })
            .is_none());
        assert!(registry
            .register_fn("ping", |_, _| async { Ok(json!("pong!")) })
            .is_some());
        registry.register_fn("alpha", |_, _| async { Ok(Value::Null) });

        assert_eq!(registry.packet_names(), vec!["alpha".to_string(), "ping".to_string()]);
        assert!(registry.unregister("ping").is_some());
        assert!(registry.get("ping").is_none());
        assert_eq!(registry.len(), 1);
    }
}
