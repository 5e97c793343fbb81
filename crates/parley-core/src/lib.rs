//! # parley-core
//!
//! Room/message synchronization engine for Parley.
//!
//! This crate provides the building blocks behind both client surfaces:
//!
//! - **RoomDirectory** - Room membership and metadata
//! - **MessageLog** - Ordered, append-mostly message store per room
//! - **Broadcaster** - Fan-out of events to joined sessions, typing relay
//! - **NotificationDispatcher** - Best-effort push to member devices
//! - **Engine** - The append, broadcast, notify pipeline
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│   Engine    │────▶│ MessageLog  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │                   │
//!        ▼                   ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Broadcaster │     │ Dispatcher  │     │  Directory  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod broadcaster;
pub mod channel;
pub mod directory;
pub mod engine;
pub mod error;
pub mod format;
pub mod identity;
pub mod message_log;
pub mod model;
pub mod notify;
pub mod store;
pub mod typing;

pub use broadcaster::{BroadcastError, Broadcaster, BroadcasterConfig, RoomSubscription, SessionHandle};
pub use channel::SessionId;
pub use directory::{NewRoom, RoomDirectory};
pub use engine::{Draft, Engine, EngineConfig, RoomCreation};
pub use error::{CoreError, CoreResult};
pub use identity::{bearer_token, IdentityVerifier, UserIdentity};
pub use message_log::MessageLog;
pub use model::{Attachment, Message, MessageState, PushEndpoint, Room, User};
pub use notify::{DeliveryError, DispatchReport, Notification, NotificationDispatcher, NotifyPolicy, PushGateway};
pub use store::{MemoryStore, Store, StoreError};
