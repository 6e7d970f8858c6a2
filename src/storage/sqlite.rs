use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    QueryBuilder, SqlitePool,
};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::types::{KvStore, StorageError};

/// Connection-level retries before a backend is reported unavailable.
const RECONNECT_ATTEMPTS: u32 = 3;
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// SqliteStore
// ============================================================================

/// Persistent [`KvStore`] on a pooled SQLite database.
///
/// The pool is created lazily: no connection is opened until the first
/// operation, and broken connections are replaced by the pool on demand.
/// Clones share the same pool.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
    schema: Arc<OnceCell<()>>,
}

impl SqliteStore {
    /// Prepare a store for `path` (`:memory:` for a private in-memory database).
    ///
    /// # Errors
    ///
    /// Only fails when `path` does not form a valid connection URL; connection
    /// problems surface on first use.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);
        let in_memory = path == ":memory:";

        // busy_timeout=5000: wait up to 5 seconds for locks before SQLITE_BUSY
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // An in-memory database lives exactly as long as its one connection
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy_with(options);

        Ok(Self {
            pool,
            schema: Arc::new(OnceCell::new()),
        })
    }

    /// Run `op`, retrying connection-class failures with backoff.
    async fn with_reconnect<T, F, Fut>(&self, name: &'static str, op: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 1;
        loop {
            match op().await.map_err(StorageError::from_sqlx) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_unavailable() && attempt < RECONNECT_ATTEMPTS => {
                    let delay = RECONNECT_BASE_DELAY * (1 << (attempt - 1));
                    tracing::debug!(
                        op = name,
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Storage connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(op = name, error = %e, "Storage operation failed");
                    return Err(e);
                }
            }
        }
    }

    /// Create the table on first use.
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.schema
            .get_or_try_init(|| async {
                let pool = &self.pool;
                self.with_reconnect("migrate", move || async move {
                    sqlx::query(
                        r#"
                        CREATE TABLE IF NOT EXISTS kv_entries (
                            key TEXT PRIMARY KEY,
                            value TEXT NOT NULL,
                            expires_at INTEGER NOT NULL
                        )
                    "#,
                    )
                    .execute(pool)
                    .await?;
                    sqlx::query(
                        "CREATE INDEX IF NOT EXISTS idx_kv_entries_expires ON kv_entries(expires_at)",
                    )
                    .execute(pool)
                    .await?;
                    Ok::<(), sqlx::Error>(())
                })
                .await
            })
            .await?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_schema().await?;
        let pool = &self.pool;
        let row: Option<(String,)> = self
            .with_reconnect("get", move || async move {
                sqlx::query_as("SELECT value FROM kv_entries WHERE key = ? AND expires_at > ?")
                    .bind(key)
                    .bind(now_millis())
                    .fetch_optional(pool)
                    .await
            })
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        self.ensure_schema().await?;
        let pool = &self.pool;
        self.with_reconnect("set", move || async move {
            sqlx::query(
                r#"
                INSERT INTO kv_entries (key, value, expires_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at = excluded.expires_at
            "#,
            )
            .bind(key)
            .bind(value)
            .bind(expiry_millis(ttl))
            .execute(pool)
            .await
        })
        .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        self.ensure_schema().await?;
        let pool = &self.pool;
        let result = self
            .with_reconnect("expire", move || async move {
                sqlx::query("UPDATE kv_entries SET expires_at = ? WHERE key = ? AND expires_at > ?")
                    .bind(expiry_millis(ttl))
                    .bind(key)
                    .bind(now_millis())
                    .execute(pool)
                    .await
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.ensure_schema().await?;
        let pool = &self.pool;
        self.with_reconnect("set_many", move || async move {
            let expires_at = expiry_millis(ttl);
            let mut tx = pool.begin().await?;
            for (key, value) in entries {
                sqlx::query(
                    r#"
                    INSERT INTO kv_entries (key, value, expires_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        expires_at = excluded.expires_at
                "#,
                )
                .bind(key)
                .bind(value)
                .bind(expires_at)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        })
        .await
    }

    /// Chunks at 500 keys per query to stay under SQLite bind-parameter limits.
    async fn live_keys(&self, keys: &[String]) -> Result<Vec<String>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_schema().await?;

        const CHUNK_SIZE: usize = 500;
        let pool = &self.pool;
        let mut live = Vec::new();

        for chunk in keys.chunks(CHUNK_SIZE) {
            let rows: Vec<(String,)> = self
                .with_reconnect("live_keys", move || async move {
                    let mut builder: QueryBuilder<sqlx::Sqlite> =
                        QueryBuilder::new("SELECT key FROM kv_entries WHERE expires_at > ");
                    builder.push_bind(now_millis());
                    builder.push(" AND key IN (");
                    let mut separated = builder.separated(", ");
                    for key in chunk {
                        separated.push_bind(key.as_str());
                    }
                    separated.push_unseparated(")");
                    builder.build_query_as().fetch_all(pool).await
                })
                .await?;
            live.extend(rows.into_iter().map(|(key,)| key));
        }

        // Keep the caller's order
        Ok(keys.iter().filter(|k| live.contains(*k)).cloned().collect())
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        self.ensure_schema().await?;
        let pool = &self.pool;
        let result = self
            .with_reconnect("purge_expired", move || async move {
                sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?")
                    .bind(now_millis())
                    .execute(pool)
                    .await
            })
            .await?;
        Ok(result.rows_affected())
    }
}
