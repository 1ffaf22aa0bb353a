//! Key-value store collaborator
//!
//! Durable string storage addressed by key. The collection and the analysis
//! credential each live under a single key. Writers must report a full store
//! as [`KvError::QuotaExceeded`] so callers can degrade to memory-only
//! operation instead of failing.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

/// Key-value store errors
#[derive(Debug, Error)]
pub enum KvError {
    /// The write would exceed the store's capacity
    #[error("Storage quota exceeded: write needs {needed} bytes, quota is {quota} bytes")]
    QuotaExceeded { needed: usize, quota: usize },

    /// Any other backend failure (I/O, database, lock poisoning)
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl KvError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, KvError::QuotaExceeded { .. })
    }
}

/// Durable string key-value store
///
/// Implementations are shared between the collection store and the credential
/// store, so they must be `Send + Sync`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Insert or replace the value stored under `key`
    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Remove `key`; removing an absent key succeeds
    async fn remove(&self, key: &str) -> Result<(), KvError>;
}

/// In-memory key-value store with an optional byte quota
///
/// Quota accounting counts key and value bytes of every entry, the same way
/// the SQLite store does.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes once the stored bytes would exceed `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Total key + value bytes currently stored
    pub async fn used_bytes(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;

        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(KvError::QuotaExceeded { needed, quota });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}
