//! Failure types for the communication protocol.
//!
//! [`CommunicationError`] is the failure side of every
//! [`CommunicationPromise`](crate::CommunicationPromise). It is serializable
//! because handler failures travel back to the caller inside a response frame.
//! [`TransportError`] covers the byte-level side of a connection and never
//! crosses the wire.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure outcome of a request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommunicationError {
    /// No response arrived before the request deadline
    #[error("request timed out after {millis}ms")]
    Timeout { millis: u64 },
    /// The connection closed while the request was pending
    #[error("connection closed")]
    ConnectionClosed,
    /// The receiver has no handler registered under the packet name
    #[error("no handler registered for packet '{packet}'")]
    NoHandler { packet: String },
    /// A required payload field was absent or could not be decoded
    #[error("missing content: {field}")]
    MissingContent { field: String },
    /// A frame or payload could not be decoded at all
    #[error("malformed packet: {message}")]
    Malformed { message: String },
    /// The handler failed unexpectedly
    #[error("internal failure: {message}")]
    Internal { message: String },
    /// The handler refused the request for a domain reason
    #[error("rejected: {message}")]
    Rejected { message: String },
}

impl CommunicationError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            millis: after.as_millis() as u64,
        }
    }

    pub fn missing_content(field: impl Into<String>) -> Self {
        Self::MissingContent {
            field: field.into(),
        }
    }

    pub fn malformed(message: impl ToString) -> Self {
        Self::Malformed {
            message: message.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Whether the failure was produced locally rather than by the remote handler.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectionClosed)
    }
}

/// Errors raised while moving frames over a byte stream.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("frame encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CommunicationError::timeout(Duration::from_millis(50)).to_string(),
            "request timed out after 50ms"
        );
        assert_eq!(
            CommunicationError::missing_content("proxy_name").to_string(),
            "missing content: proxy_name"
        );
        assert_eq!(
            CommunicationError::ConnectionClosed.to_string(),
            "connection closed"
        );
    }

    #[test]
    fn test_error_travels_as_tagged_json() {
        let error = CommunicationError::NoHandler {
            packet: "player.create".to_string(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["kind"], "no_handler");
        assert_eq!(json["packet"], "player.create");

        let back: CommunicationError = serde_json::from_value(json).unwrap();
        assert_eq!(back, error);
    }

    #[test]
    fn test_local_failures() {
        assert!(CommunicationError::ConnectionClosed.is_local());
        assert!(CommunicationError::timeout(Duration::from_secs(1)).is_local());
        assert!(!CommunicationError::internal("boom").is_local());
    }
}
