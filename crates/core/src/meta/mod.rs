//! SQLite-backed metadata for cache groups, items, and their membership.
//!
//! The tokio-rusqlite connection runs every call on one background thread,
//! which is the single serialized writer the engine's consistency contract
//! relies on. WAL mode keeps readers on the last-committed state.

pub mod connection;
pub mod migrations;
pub mod records;

pub use crate::Error;

pub use connection::MetaDb;
pub use records::{CacheGroup, CacheItem};
