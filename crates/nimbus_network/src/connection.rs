//! Logical connections between cluster members.
//!
//! A [`Connection`] is the sending half of a duplex channel plus the table of
//! requests still waiting for a response. It does not own any I/O: outbound
//! frames go into an unbounded queue that a writer task drains (see
//! [`crate::transport`]), and inbound responses are fed back through
//! [`Connection::resolve`] by the dispatch core.
//!
//! Closing a connection, or dropping its last handle, fails every pending
//! request with [`CommunicationError::ConnectionClosed`].

use crate::error::CommunicationError;
use crate::packet::{Frame, Notification, Packet, RequestId};
use crate::promise::CommunicationPromise;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Default deadline for outbound requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Unique identifier of a connection within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ConnectionInner {
    id: ConnectionId,
    remote: String,
    outbound: mpsc::UnboundedSender<Frame>,
    open: AtomicBool,
    closed: watch::Sender<bool>,
    pending: DashMap<RequestId, CommunicationPromise<Value>>,
    request_timeout: Duration,
}

impl ConnectionInner {
    fn fail_pending(&self) {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, promise)) = self.pending.remove(&id) {
                promise.try_failure(CommunicationError::ConnectionClosed);
            }
        }
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.fail_pending();
    }
}

/// Handle to one duplex channel. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Creates a connection and the receiver its writer task must drain.
    pub fn new(
        remote: impl Into<String>,
        request_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::new(),
                remote: remote.into(),
                outbound,
                open: AtomicBool::new(true),
                closed,
                pending: DashMap::new(),
                request_timeout,
            }),
        };
        (connection, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Remote endpoint label, usually a socket address.
    pub fn remote(&self) -> &str {
        &self.inner.remote
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Sends a request with the connection's default deadline.
    pub fn send_request(&self, packet: &str, payload: Value) -> CommunicationPromise<Value> {
        self.send_request_with_timeout(packet, payload, self.inner.request_timeout)
    }

    /// Sends a request and returns its promise without waiting.
    ///
    /// Must be called from within a tokio runtime: the deadline is enforced
    /// by a spawned watcher that ends as soon as the promise settles.
    pub fn send_request_with_timeout(
        &self,
        packet: &str,
        payload: Value,
        timeout: Duration,
    ) -> CommunicationPromise<Value> {
        if !self.is_open() {
            return CommunicationPromise::failed(CommunicationError::ConnectionClosed);
        }

        let id = RequestId::new();
        let promise = CommunicationPromise::new();
        self.inner.pending.insert(id, promise.clone());

        // A close racing with the insert above must not strand the entry.
        if !self.is_open() {
            self.inner.pending.remove(&id);
            promise.try_failure(CommunicationError::ConnectionClosed);
            return promise;
        }

        let frame = Frame::Request {
            id,
            packet: packet.to_string(),
            payload,
        };
        if self.inner.outbound.send(frame).is_err() {
            self.inner.pending.remove(&id);
            promise.try_failure(CommunicationError::ConnectionClosed);
            return promise;
        }
        trace!(connection = %self.inner.id, %id, packet, "➡️ Request sent");

        self.watch_deadline(id, promise.clone(), timeout);
        promise
    }

    fn watch_deadline(&self, id: RequestId, promise: CommunicationPromise<Value>, timeout: Duration) {
        let inner: Weak<ConnectionInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            if tokio::time::timeout(timeout, promise.wait()).await.is_ok() {
                return;
            }
            if let Some(inner) = inner.upgrade() {
                if let Some((_, pending)) = inner.pending.remove(&id) {
                    debug!(connection = %inner.id, %id, ?timeout, "⏰ Request timed out");
                    pending.try_failure(CommunicationError::timeout(timeout));
                }
            }
        });
    }

    /// Sends a typed request and decodes the typed response.
    pub fn request<P: Packet>(&self, packet: &P) -> CommunicationPromise<P::Response> {
        self.request_with_timeout(packet, self.inner.request_timeout)
    }

    pub fn request_with_timeout<P: Packet>(
        &self,
        packet: &P,
        timeout: Duration,
    ) -> CommunicationPromise<P::Response> {
        let payload = match serde_json::to_value(packet) {
            Ok(payload) => payload,
            Err(error) => return CommunicationPromise::failed(CommunicationError::malformed(error)),
        };
        self.send_request_with_timeout(P::NAME, payload, timeout)
            .then(|value| serde_json::from_value(value).map_err(CommunicationError::malformed))
    }

    /// Sends a fire-and-forget packet. Never touches the pending table.
    pub fn notify(&self, packet: &str, payload: Value) -> Result<(), CommunicationError> {
        if !self.is_open() {
            return Err(CommunicationError::ConnectionClosed);
        }
        self.inner
            .outbound
            .send(Frame::Notification {
                packet: packet.to_string(),
                payload,
            })
            .map_err(|_| CommunicationError::ConnectionClosed)
    }

    /// Sends a typed fire-and-forget packet.
    pub fn send_notification<N: Notification>(&self, notification: &N) -> Result<(), CommunicationError> {
        let payload = serde_json::to_value(notification).map_err(CommunicationError::malformed)?;
        self.notify(N::NAME, payload)
    }

    /// Ships a handler outcome back to the requester.
    pub(crate) fn respond(&self, id: RequestId, outcome: Result<Value, CommunicationError>) {
        if !self.is_open() {
            debug!(connection = %self.inner.id, %id, "Dropping response for closed connection");
            return;
        }
        if self.inner.outbound.send(Frame::Response { id, outcome }).is_err() {
            debug!(connection = %self.inner.id, %id, "Writer gone, response dropped");
        }
    }

    /// Completes the pending request matching `id`.
    ///
    /// Returns `false` for an unknown or already completed id; such late
    /// responses are discarded.
    pub fn resolve(&self, id: RequestId, outcome: Result<Value, CommunicationError>) -> bool {
        match self.inner.pending.remove(&id) {
            Some((_, promise)) => promise.try_complete(outcome),
            None => {
                debug!(connection = %self.inner.id, %id, "Discarding response for unknown request");
                false
            }
        }
    }

    /// Marks the connection closed and fails every pending request.
    pub fn close(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            debug!(connection = %self.inner.id, remote = %self.inner.remote, "🔌 Connection closed");
            self.inner.closed.send_replace(true);
            let pending = self.inner.pending.len();
            if pending > 0 {
                warn!(connection = %self.inner.id, pending, "Failing requests pending on closed connection");
            }
            self.inner.fail_pending();
        }
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("open", &self.is_open())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}
