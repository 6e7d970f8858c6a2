use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by a [`KvStore`] backend.
///
/// None of these are swallowed by the mapping store: a backend that cannot
/// be reached means feed identifiers cannot be resolved at all.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached (after reconnect attempts)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backend was reachable but the operation failed
    #[error("Storage query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A stored value could not be encoded or decoded
    #[error("Stored record could not be decoded: {0}")]
    Codec(#[from] serde_json::Error),
}

impl StorageError {
    /// Classify a sqlx error, separating connection trouble from query failures.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_) => StorageError::Unavailable(err.to_string()),
            other => {
                let message = other.to_string().to_lowercase();
                if message.contains("unable to open database file")
                    || message.contains("database is locked")
                {
                    StorageError::Unavailable(other.to_string())
                } else {
                    StorageError::Query(other)
                }
            }
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

// ============================================================================
// Records
// ============================================================================

/// A stored subscription: which titles a feed identifier stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMapping {
    pub feed_id: String,
    /// Sorted, deduplicated title slugs
    pub slugs: Vec<String>,
    pub lang: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Backend capability
// ============================================================================

/// Key-value backend with per-entry expiration.
///
/// Values are serialized records. Expired entries behave exactly like
/// missing ones for every read.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Live value for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or replace `key`, expiring `ttl` from now.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;

    /// Push the expiry of a live `key` to `ttl` from now.
    ///
    /// Returns `false` if the key is absent or already expired.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Write several entries as one atomic batch.
    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StorageError>;

    /// The subset of `keys` that currently hold a live value.
    async fn live_keys(&self, keys: &[String]) -> Result<Vec<String>, StorageError>;

    /// Delete expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, StorageError>;
}
