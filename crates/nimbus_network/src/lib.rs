//! # Nimbus Network
//!
//! Asynchronous request/response messaging between the nodes of a Nimbus
//! cluster (manager, wrappers and proxies).
//!
//! ## Architecture
//!
//! * [`CommunicationPromise`] - single-assignment result of an in-flight request
//! * [`Connection`] - one duplex channel plus its pending-request table
//! * [`HandlerRegistry`] - packet name to handler mapping
//! * [`Dispatcher`] - routes inbound frames to handlers and responses to promises
//! * [`transport`] - length-prefixed JSON framing over TCP or any async stream
//! * [`sync_object`] - manager-owned values replicated by request and push
//!
//! ## Example
//!
//! ```rust,no_run
//! use nimbus_network::{connect, Dispatcher, HandlerRegistry};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::new(Arc::new(HandlerRegistry::new()));
//! let manager = connect("127.0.0.1:1630", &dispatcher, Duration::from_secs(10)).await?;
//!
//! let reply = manager
//!     .send_request("service.list", serde_json::json!({}))
//!     .await_timeout(Duration::from_millis(500))
//!     .await;
//! println!("{reply:?}");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod connections;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod packet;
pub mod promise;
pub mod sync_object;
pub mod transport;

pub use connection::{Connection, ConnectionId, DEFAULT_REQUEST_TIMEOUT};
pub use connections::ConnectionRegistry;
pub use dispatch::{Dispatcher, InboundRouter};
pub use error::{CommunicationError, TransportError};
pub use handler::{HandlerRegistry, PacketHandler};
pub use packet::{Frame, Notification, Packet, Payload, RequestId};
pub use promise::{CommunicationPromise, PromiseResult};
pub use sync_object::{
    ObjectHolder, SyncObjectRequest, SyncObjectSnapshot, SynchronizedObjectAuthority,
    SynchronizedObjectClient,
};
pub use transport::{connect, spawn_connection, NetworkListener};
