//! SQLite-backed key-value store
//!
//! Values live in the `kv_store` table. An optional byte quota bounds the sum
//! of key and value sizes, and a full disk (SQLITE_FULL) is reported as a
//! quota failure as well.

use crate::kv::{KeyValueStore, KvError};
use async_trait::async_trait;
use sqlx::SqlitePool;

/// SQLite result code for "database or disk is full"
const SQLITE_FULL: &str = "13";

impl From<sqlx::Error> for KvError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(SQLITE_FULL) {
                return KvError::QuotaExceeded { needed: 0, quota: 0 };
            }
        }
        KvError::Backend(err.to_string())
    }
}

/// Key-value store over the shared SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
    quota_bytes: Option<usize>,
}

impl SqliteKvStore {
    /// Create a store over an initialized pool (see `init_database_pool`)
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            quota_bytes: None,
        }
    }

    /// Limit total stored key + value bytes
    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Bytes used by every entry except `key`
    async fn bytes_excluding(&self, key: &str) -> Result<usize, KvError> {
        let (used,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv_store WHERE key != ?",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        Ok(used.max(0) as usize)
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        if let Some(quota) = self.quota_bytes {
            let needed = self.bytes_excluding(key).await? + key.len() + value.len();
            if needed > quota {
                return Err(KvError::QuotaExceeded { needed, quota });
            }
        }

        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        tracing::debug!(key, bytes = value.len(), "Stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
