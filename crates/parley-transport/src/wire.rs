//! Socket message encoding.
//!
//! JSON frames travel in text messages, MessagePack frames in binary
//! messages. A binary message may carry several length-prefixed frames, or
//! only part of one, so decoding buffers binary input.

use bytes::{Bytes, BytesMut};
use parley_protocol::{codec, Encoding, ProtocolError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Default maximum size of a single socket message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// A socket-level message carrying encoded frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl WireMessage {
    /// Encode a frame with the given encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or serialization fails.
    pub fn encode<T: Serialize>(frame: &T, encoding: Encoding) -> Result<Self, ProtocolError> {
        match encoding {
            Encoding::Json => codec::encode_json(frame).map(WireMessage::Text),
            Encoding::MessagePack => codec::encode(frame).map(WireMessage::Binary),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Incremental frame decoder for one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_message_size: usize,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    /// Decode a frame left over in the binary buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffered frame is invalid.
    pub fn buffered<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        codec::decode_from(&mut self.buffer)
    }

    /// Feed one socket message and decode the next frame, if complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the size limit or does not
    /// hold a valid frame. The connection stays usable afterwards.
    pub fn feed<T: DeserializeOwned>(
        &mut self,
        message: WireMessage,
    ) -> Result<Option<T>, ProtocolError> {
        if message.len() > self.max_message_size {
            return Err(ProtocolError::FrameTooLarge(message.len()));
        }
        match message {
            WireMessage::Text(text) => codec::decode_json(&text).map(Some),
            WireMessage::Binary(data) => {
                self.buffer.extend_from_slice(&data);
                if self.buffer.len() > self.max_message_size + codec::LENGTH_PREFIX_SIZE {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    return Err(ProtocolError::FrameTooLarge(size));
                }
                self.buffered()
            }
        }
    }

    /// Bytes waiting for the rest of a frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}
