//! Connection abstraction for Parley.
//!
//! The session gateway drives any [`Connection`]: a WebSocket in production,
//! an in-process pair in tests.

use async_trait::async_trait;
use parley_protocol::{ClientIntent, Encoding, ServerEvent};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-ordered connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::now_v7().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<ConnectionId> for String {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] parley_protocol::ProtocolError),
}

impl TransportError {
    /// Whether the connection can keep going after this error.
    ///
    /// Malformed inbound frames are dropped; everything else ends the
    /// session.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// An established, authenticated channel connection.
///
/// Connections carry client intents in and server events out for a single
/// client.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Frame encoding used for outbound events.
    fn encoding(&self) -> Encoding;

    /// Receive the next intent from the connection.
    ///
    /// Returns `None` if the connection is closed cleanly. Must be cancel
    /// safe: partially received frames stay buffered.
    async fn recv(&mut self) -> Result<Option<ClientIntent>, TransportError>;

    /// Send an event to the connection.
    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
        assert_eq!(String::from(id), "test-id");
    }

    #[test]
    fn test_recoverable_errors() {
        let err = TransportError::from(parley_protocol::ProtocolError::Invalid("x".into()));
        assert!(err.is_recoverable());
        assert!(!TransportError::ConnectionClosed.is_recoverable());
    }
}
