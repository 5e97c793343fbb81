//! # parley-transport
//!
//! Connection layer for the Parley realtime channel.
//!
//! The session gateway is written against the [`Connection`] trait, which
//! yields decoded [`ClientIntent`](parley_protocol::ClientIntent)s and
//! accepts [`ServerEvent`](parley_protocol::ServerEvent)s:
//!
//! - [`WebSocketConnection`] - An upgraded axum WebSocket
//! - [`MemoryConnection`] - An in-process pair for tests and tools
//!
//! Frames are JSON in text messages or length-prefixed MessagePack in binary
//! messages, see [`wire`].
//!
//! ```rust,ignore
//! use parley_transport::Connection;
//!
//! async fn handle_connection(mut conn: impl Connection) {
//!     while let Ok(Some(intent)) = conn.recv().await {
//!         // Dispatch intent
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;
pub mod websocket;
pub mod wire;

pub use memory::{MemoryConnection, MemoryPeer};
pub use traits::{Connection, ConnectionId, TransportError};
pub use websocket::{WebSocketConfig, WebSocketConnection};
pub use wire::{FrameDecoder, WireMessage, DEFAULT_MAX_MESSAGE_SIZE};
