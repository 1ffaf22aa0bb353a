//! SQLite persistence for Galleria

pub mod init;
pub mod kv_store;

pub use init::*;
pub use kv_store::SqliteKvStore;
