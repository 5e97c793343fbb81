//! # parley-store
//!
//! Durable storage for Parley on SQLite.
//!
//! [`SqliteStore`] implements the room, message and user store traits of
//! `parley-core`. Ids are stored as hyphenated text and timestamps as epoch
//! milliseconds. Single-row conditional updates give edits and deletes their
//! atomicity; a unique index on the sorted member pair keeps direct rooms
//! unique.

mod rows;
mod schema;
mod sqlite;

pub use sqlite::SqliteStore;
