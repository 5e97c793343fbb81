//! In-process connection pair.
//!
//! Frames are still encoded and decoded on both ends, so a memory pair
//! behaves like a socket minus the network.

use async_trait::async_trait;
use parley_protocol::{ClientIntent, Encoding, ServerEvent};
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, TransportError};
use crate::wire::{FrameDecoder, WireMessage};

/// Server side of a memory pair.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    encoding: Encoding,
    inbound: mpsc::UnboundedReceiver<WireMessage>,
    outbound: mpsc::UnboundedSender<WireMessage>,
    decoder: FrameDecoder,
    is_open: bool,
}

/// Client side of a memory pair.
#[derive(Debug)]
pub struct MemoryPeer {
    encoding: Encoding,
    outbound: Option<mpsc::UnboundedSender<WireMessage>>,
    inbound: mpsc::UnboundedReceiver<WireMessage>,
    decoder: FrameDecoder,
}

impl MemoryConnection {
    /// Create a connected pair using JSON frames.
    #[must_use]
    pub fn pair() -> (MemoryConnection, MemoryPeer) {
        Self::pair_with(Encoding::Json)
    }

    /// Create a connected pair using the given encoding in both directions.
    #[must_use]
    pub fn pair_with(encoding: Encoding) -> (MemoryConnection, MemoryPeer) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        let conn = MemoryConnection {
            id: ConnectionId::generate(),
            encoding,
            inbound: from_client,
            outbound: to_client,
            decoder: FrameDecoder::default(),
            is_open: true,
        };
        let peer = MemoryPeer {
            encoding,
            outbound: Some(to_server),
            inbound: from_server,
            decoder: FrameDecoder::default(),
        };
        (conn, peer)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }

    async fn recv(&mut self) -> Result<Option<ClientIntent>, TransportError> {
        if let Some(intent) = self.decoder.buffered()? {
            return Ok(Some(intent));
        }
        loop {
            let Some(message) = self.inbound.recv().await else {
                self.is_open = false;
                return Ok(None);
            };
            if let Some(intent) = self.decoder.feed(message)? {
                return Ok(Some(intent));
            }
        }
    }

    async fn send(&mut self, event: &ServerEvent) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        let message = WireMessage::encode(event, self.encoding)?;
        self.outbound
            .send(message)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.is_open = false;
        self.inbound.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

impl MemoryPeer {
    /// Send an intent to the server side.
    ///
    /// # Errors
    ///
    /// Fails once the peer or the server side is closed.
    pub fn send(&self, intent: &ClientIntent) -> Result<(), TransportError> {
        let message = WireMessage::encode(intent, self.encoding)?;
        self.send_raw(message)
    }

    /// Send a raw socket message, valid or not.
    ///
    /// # Errors
    ///
    /// Fails once the peer or the server side is closed.
    pub fn send_raw(&self, message: WireMessage) -> Result<(), TransportError> {
        self.outbound
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(message)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next event, or `None` once the server side is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the server sent an undecodable frame.
    pub async fn recv(&mut self) -> Result<Option<ServerEvent>, TransportError> {
        if let Some(event) = self.decoder.buffered()? {
            return Ok(Some(event));
        }
        while let Some(message) = self.inbound.recv().await {
            if let Some(event) = self.decoder.feed(message)? {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        if let Ok(Some(event)) = self.decoder.buffered() {
            return Some(event);
        }
        while let Ok(message) = self.inbound.try_recv() {
            if let Ok(Some(event)) = self.decoder.feed(message) {
                return Some(event);
            }
        }
        None
    }

    /// Hang up; the server side sees a clean close.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}
