//! Dispatch core: routes inbound frames to handlers and responses to promises.
//!
//! The read loop of every connection hands each decoded frame to an
//! [`InboundRouter`] in arrival order. Routing never waits on a handler:
//!
//! * **Requests** are spawned as independent tasks; their outcome is sent
//!   back as a response frame carrying the original [`RequestId`].
//! * **Notifications** go onto a per-connection lane worked by a single task,
//!   so fire-and-forget packets (synchronized object pushes in particular)
//!   apply in the order the peer sent them without holding up requests.
//! * **Responses** complete the matching pending promise on the connection.
//!
//! Handler panics are caught and turned into
//! [`CommunicationError::Internal`] responses.

use crate::codec::{decode_frame, salvage_correlation};
use crate::connection::Connection;
use crate::error::CommunicationError;
use crate::handler::{HandlerRegistry, PacketHandler};
use crate::packet::{Frame, Payload, RequestId};
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// Node-wide dispatcher over a shared [`HandlerRegistry`].
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Arc<Self> {
        Arc::new(Self { handlers })
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Binds the dispatcher to one connection and starts its notification lane.
    pub fn attach(self: &Arc<Self>, connection: Connection) -> InboundRouter {
        let (lane, mut notifications) = mpsc::unbounded_channel::<(String, Payload)>();
        let dispatcher = Arc::clone(self);
        let lane_connection = connection.clone();
        tokio::spawn(async move {
            while let Some((packet, payload)) = notifications.recv().await {
                dispatcher
                    .handle_notification(&lane_connection, &packet, payload)
                    .await;
            }
            trace!(connection = %lane_connection.id(), "Notification lane finished");
        });

        InboundRouter {
            dispatcher: Arc::clone(self),
            connection,
            lane,
        }
    }

    fn spawn_request(&self, connection: &Connection, id: RequestId, packet: String, payload: Payload) {
        let handler = self.handlers.get(&packet);
        let connection = connection.clone();
        tokio::spawn(async move {
            let outcome = match handler {
                Some(handler) => invoke(handler, &connection, &packet, payload).await,
                None => {
                    warn!(connection = %connection.id(), packet = %packet, "❓ No handler registered");
                    Err(CommunicationError::NoHandler { packet })
                }
            };
            connection.respond(id, outcome);
        });
    }

    async fn handle_notification(&self, connection: &Connection, packet: &str, payload: Payload) {
        let Some(handler) = self.handlers.get(packet) else {
            warn!(connection = %connection.id(), packet, "❓ No handler for notification");
            return;
        };
        if let Err(err) = invoke(handler, connection, packet, payload).await {
            warn!(connection = %connection.id(), packet, "Notification handler failed: {}", err);
        }
    }
}

async fn invoke(
    handler: Arc<dyn PacketHandler>,
    connection: &Connection,
    packet: &str,
    payload: Payload,
) -> Result<Value, CommunicationError> {
    match AssertUnwindSafe(handler.handle(connection, payload))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(connection = %connection.id(), packet, "💥 Handler panicked: {}", message);
            Err(CommunicationError::internal(format!(
                "handler for '{packet}' failed"
            )))
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Per-connection entry point used by the read loop.
pub struct InboundRouter {
    dispatcher: Arc<Dispatcher>,
    connection: Connection,
    lane: mpsc::UnboundedSender<(String, Payload)>,
}

impl InboundRouter {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Routes one decoded frame.
    pub fn route(&self, frame: Frame) {
        match frame {
            Frame::Request { id, packet, payload } => {
                trace!(connection = %self.connection.id(), %id, packet = %packet, "⬅️ Request received");
                self.dispatcher
                    .spawn_request(&self.connection, id, packet, Payload::new(payload));
            }
            Frame::Notification { packet, payload } => {
                if self.lane.send((packet, Payload::new(payload))).is_err() {
                    debug!(connection = %self.connection.id(), "Notification lane closed");
                }
            }
            Frame::Response { id, outcome } => {
                self.connection.resolve(id, outcome);
            }
        }
    }

    /// Decodes and routes raw frame bytes.
    ///
    /// A request that cannot be decoded is still answered with
    /// [`CommunicationError::Malformed`] when its id can be recovered; an
    /// undecodable response fails the matching pending promise.
    pub fn route_bytes(&self, bytes: &[u8]) {
        match decode_frame(bytes) {
            Ok(frame) => self.route(frame),
            Err(err) => {
                warn!(connection = %self.connection.id(), "⚠️ Malformed frame: {}", err);
                match salvage_correlation(bytes) {
                    Some((kind, id)) if kind == "request" => {
                        self.connection
                            .respond(id, Err(CommunicationError::malformed(err)));
                    }
                    Some((kind, id)) if kind == "response" => {
                        self.connection
                            .resolve(id, Err(CommunicationError::malformed(err)));
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DEFAULT_REQUEST_TIMEOUT;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn response(frame: Frame) -> (RequestId, Result<Value, CommunicationError>) {
        match frame {
            Frame::Response { id, outcome } => (id, outcome),
            other => panic!("expected response, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_unknown_packet_gets_no_handler_response() {
        let dispatcher = Dispatcher::new(Arc::new(HandlerRegistry::new()));
        let (connection, mut outbound) = Connection::new("peer", DEFAULT_REQUEST_TIMEOUT);
        let router = dispatcher.attach(connection);

        let id = RequestId::new();
        router.route(Frame::Request {
            id,
            packet: "missing.packet".to_string(),
            payload: json!({}),
        });

        let (answered, outcome) = response(outbound.recv().await.unwrap());
        assert_eq!(answered, id);
        assert_eq!(
            outcome,
            Err(CommunicationError::NoHandler {
                packet: "missing.packet".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_internal_failure() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register_fn("explode", |_, _| async {
            if true {
                panic!("handler bug");
            }
            Ok(Value::Null)
        });
        let dispatcher = Dispatcher::new(handlers);
        let (connection, mut outbound) = Connection::new("peer", DEFAULT_REQUEST_TIMEOUT);
        let router = dispatcher.attach(connection);

        router.route(Frame::Request {
            id: RequestId::new(),
            packet: "explode".to_string(),
            payload: json!({}),
        });

        let (_, outcome) = response(outbound.recv().await.unwrap());
        assert!(matches!(outcome, Err(CommunicationError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_slow_request_does_not_block_later_ones() {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register_fn("slow", |_, _| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("slow"))
        });
        handlers.register_fn("fast", |_, _| async { Ok(json!("fast")) });
        let dispatcher = Dispatcher::new(handlers);
        let (connection, mut outbound) = Connection::new("peer", DEFAULT_REQUEST_TIMEOUT);
        let router = dispatcher.attach(connection);

        let slow_id = RequestId::new();
        let fast_id = RequestId::new();
        router.route(Frame::Request {
            id: slow_id,
            packet: "slow".to_string(),
            payload: json!({}),
        });
        router.route(Frame::Request {
            id: fast_id,
            packet: "fast".to_string(),
            payload: json!({}),
        });

        let (first, _) = response(outbound.recv().await.unwrap());
        let (second, _) = response(outbound.recv().await.unwrap());
        assert_eq!(first, fast_id);
        assert_eq!(second, slow_id);
    }

    #[tokio::test]
    async fn test_notifications_apply_in_arrival_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handlers = Arc::new(HandlerRegistry::new());
        let sink = seen.clone();
        handlers.register_fn("tick", move |_, payload: Payload| {
            let sink = sink.clone();
            async move {
                let n: u64 = payload.require("n")?;
                // Earlier ticks sleep longer; order must still hold.
                tokio::time::sleep(Duration::from_millis(20 - n * 2)).await;
                sink.lock().unwrap().push(n);
                Ok(Value::Null)
            }
        });
        let dispatcher = Dispatcher::new(handlers);
        let (connection, mut outbound) = Connection::new("peer", DEFAULT_REQUEST_TIMEOUT);
        let router = dispatcher.attach(connection);

        for n in 0..5u64 {
            router.route(Frame::Notification {
                packet: "tick".to_string(),
                payload: json!({ "n": n }),
            });
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        // Fire-and-forget never produces a response frame.
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_request_is_answered() {
        let dispatcher = Dispatcher::new(Arc::new(HandlerRegistry::new()));
        let (connection, mut outbound) = Connection::new("peer", DEFAULT_REQUEST_TIMEOUT);
        let router = dispatcher.attach(connection);

        let id = RequestId::new();
        let bytes = serde_json::to_vec(&json!({ "frame": "request", "id": id })).unwrap();
        router.route_bytes(&bytes);

        let (answered, outcome) = response(outbound.recv().await.unwrap());
        assert_eq!(answered, id);
        assert!(matches!(outcome, Err(CommunicationError::Malformed { .. })));
    }
}
