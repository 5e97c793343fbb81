//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat engine.
//!
//! This crate defines what travels over the realtime channel between Parley
//! clients and servers, and the formatted views shared with the REST surface.
//!
//! ## Channel events
//!
//! - `joinRoom` / `leaveRoom` - Room membership of a session
//! - `sendMessage` / `editMessage` / `deleteMessage` - Message mutations
//! - `typing` - Ephemeral typing signal
//! - `newMessage` / `messageEdited` / `messageDeleted` / `userTyping` - Fan-out
//!
//! Every frame has the shape `{"event": "<name>", "data": <payload>}`.
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ClientIntent};
//! use uuid::Uuid;
//!
//! let intent = ClientIntent::JoinRoom(Uuid::nil());
//!
//! let text = codec::encode_json(&intent).unwrap();
//! let decoded: ClientIntent = codec::decode_json(&text).unwrap();
//! assert_eq!(intent, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;
pub mod views;

pub use codec::{decode, decode_json, encode, encode_json, Encoding, ProtocolError};
pub use frames::{
    ClientIntent, DeleteMessage, EditMessage, EventKind, SendMessage, ServerEvent, TypingNotice,
    TypingSignal, Welcome,
};
pub use version::{Version, PROTOCOL_VERSION};
pub use views::{
    MessageId, MessageView, RoomId, RoomKind, RoomView, SenderRef, UserId, UserSummary,
};
