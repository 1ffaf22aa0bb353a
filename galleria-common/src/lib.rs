//! # Galleria Common Library
//!
//! Shared code for the Galleria crates:
//! - Error type and result alias
//! - TOML bootstrap configuration and root folder resolution
//! - Collection events (GalleryEvent enum) and the EventBus
//! - Key-value store collaborator used for durable state

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod kv;

pub use error::{Error, Result};
pub use events::{EventBus, GalleryEvent};
pub use kv::{KeyValueStore, KvError, MemoryKvStore};
