//! WebSocket connection over an upgraded axum socket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parley_protocol::{ClientIntent, Encoding, ServerEvent};
use tracing::{debug, warn};

use crate::traits::{Connection, ConnectionId, TransportError};
use crate::wire::{FrameDecoder, WireMessage, DEFAULT_MAX_MESSAGE_SIZE};

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum message size in bytes.
    pub max_message_size: usize,
    /// Encoding of outbound events.
    pub encoding: Encoding,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            encoding: Encoding::Json,
        }
    }
}

/// A WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    socket: WebSocket,
    decoder: FrameDecoder,
    encoding: Encoding,
    is_open: bool,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket, config: WebSocketConfig) -> Self {
        Self::with_id(ConnectionId::generate(), socket, config)
    }

    /// Wrap an upgraded socket under a known id.
    #[must_use]
    pub fn with_id(id: ConnectionId, socket: WebSocket, config: WebSocketConfig) -> Self {
        Self {
            id,
            socket,
            decoder: FrameDecoder::new(config.max_message_size),
            encoding: config.encoding,
            is_open: true,
        }
    }

    async fn send_message(&mut self, message: Message) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.socket
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }

    async fn recv(&mut self) -> Result<Option<ClientIntent>, TransportError> {
        // First, drain frames left in the binary buffer.
        if let Some(intent) = self.decoder.buffered()? {
            return Ok(Some(intent));
        }

        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(self.decoder.feed(WireMessage::Text(text))?);
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Some(intent) = self.decoder.feed(WireMessage::Binary(Bytes::from(data)))? {
                        return Ok(Some(intent));
                    }
                    // Need more data, continue reading
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.socket.send(Message::Pong(data)).await {
                        warn!(connection = %self.id, error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    debug!(connection = %self.id, error = %e, "WebSocket error");
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        let message = match WireMessage::encode(event, self.encoding)? {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(data) => Message::Binary(data.to_vec()),
        };
        self.send_message(message).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }
        SinkExt::close(&mut self.socket)
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {e}")))
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.id)
            .field("encoding", &self.encoding)
            .field("is_open", &self.is_open)
            .finish_non_exhaustive()
    }
}
