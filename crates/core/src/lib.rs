//! Cache engine for permacache.
//!
//! This crate provides:
//! - Deterministic cache-key derivation for article resources
//! - Flat-file blob storage addressed by hashed keys
//! - SQLite-backed group/item metadata with a serialized writer
//! - The save/remove pipelines and change notifications
//! - In-flight fetch tracking with cancellation by owner

pub mod blob;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod meta;
pub mod tasks;

pub use blob::{BlobStore, PutOutcome};
pub use config::AppConfig;
pub use engine::{CacheEngine, CacheEvent, CachedResponse, RemoveOutcome};
pub use error::Error;
pub use key::{ResourceKind, group_key, hashed_path, item_key};
pub use meta::MetaDb;
pub use tasks::TaskTracker;
