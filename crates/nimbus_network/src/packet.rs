//! Packets, payloads and the wire frame.
//!
//! Every message between cluster members is a [`Frame`]: a request that
//! expects a response, a fire-and-forget notification, or a response
//! correlated to an earlier request by its [`RequestId`]. Payloads are plain
//! JSON objects; [`Payload`] wraps them with field accessors that turn a
//! missing or undecodable field into [`CommunicationError::MissingContent`].
//!
//! Typed messages implement [`Packet`] (request/response) or
//! [`Notification`] (fire-and-forget) and carry their wire name as an
//! associated constant.

use crate::error::CommunicationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Correlation id assigned by the sender of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: RequestId,
        packet: String,
        payload: Value,
    },
    Notification {
        packet: String,
        payload: Value,
    },
    Response {
        id: RequestId,
        outcome: Result<Value, CommunicationError>,
    },
}

impl Frame {
    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Request { .. } => "request",
            Frame::Notification { .. } => "notification",
            Frame::Response { .. } => "response",
        }
    }
}

/// A request message with a typed response.
pub trait Packet: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name the receiver's handler is registered under.
    const NAME: &'static str;
    type Response: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
}

/// A fire-and-forget message.
pub trait Notification: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}

/// Structured key-value payload handed to handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload(Value);

impl Payload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Serializes a value into a payload.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, CommunicationError> {
        serde_json::to_value(value)
            .map(Self)
            .map_err(CommunicationError::malformed)
    }

    /// Reads a required field.
    ///
    /// A field that is absent, `null` or of the wrong shape yields
    /// [`CommunicationError::MissingContent`] naming the field.
    pub fn require<T: DeserializeOwned>(&self, field: &str) -> Result<T, CommunicationError> {
        self.optional(field)?
            .ok_or_else(|| CommunicationError::missing_content(field))
    }

    /// Reads an optional field; a present but undecodable field is still an error.
    pub fn optional<T: DeserializeOwned>(
        &self,
        field: &str,
    ) -> Result<Option<T>, CommunicationError> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|_| CommunicationError::missing_content(field)),
        }
    }

    /// Decodes the whole payload as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CommunicationError> {
        T::deserialize(&self.0)
            .map_err(|error| CommunicationError::missing_content(field_from_error(&error)))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Pulls the field name out of serde's "missing field `x`" message. Any
/// other decode failure names the payload as a whole, since the backticked
/// token in those messages is the offending value rather than a field.
fn field_from_error(error: &serde_json::Error) -> String {
    error
        .to_string()
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split_once('`'))
        .map(|(field, _)| field.to_string())
        .unwrap_or_else(|| "payload".to_string())
}
