//! SQLite-backed state store.
//!
//! One table holds every collection. The `(collection, key)` primary key
//! serves point lookups and prefix range scans alike. Conditional writes
//! are single statements (`UPDATE … WHERE version = ?` and
//! `INSERT … ON CONFLICT DO UPDATE … WHERE expired`), so they are atomic
//! across every process sharing the database file.

use super::{error::Result, error::StorageError, expiry_from, Record, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Default pool size for SQLite connection pool.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

const RETURNING_COLUMNS: &str = "key, value, version, expires_at, updated_at";

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_size: u32,
    /// Minimum number of idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Maximum time to wait for a connection from the pool.
    pub connection_timeout: Duration,
    /// Idle timeout for connections.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            min_idle: Some(1),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// SQLite state store with connection pooling.
pub struct SqliteStateStore {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteStateStore {
    /// Opens (creating if missing) a database file with the default pool configuration.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, PoolConfig::default()).await
    }

    pub async fn with_config(db_path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path_str))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = Self::build_pool(connect_options, &config).await?;
        let store = Self {
            pool,
            db_path: db_path_str,
        };
        store.initialize().await?;

        info!("Opened SQLite state store at {}", store.db_path);
        Ok(store)
    }

    /// Creates an in-memory database.
    ///
    /// In-memory SQLite databases are private to a connection, so the pool is
    /// pinned to a single connection.
    pub async fn in_memory() -> Result<Self> {
        let config = PoolConfig {
            max_size: 1,
            min_idle: Some(1),
            idle_timeout: None,
            ..PoolConfig::default()
        };

        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Memory)
            .synchronous(SqliteSynchronous::Normal);

        let pool = Self::build_pool(connect_options, &config).await?;
        let store = Self {
            pool,
            db_path: ":memory:".to_string(),
        };
        store.initialize().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    async fn build_pool(
        connect_options: SqliteConnectOptions,
        config: &PoolConfig,
    ) -> Result<Pool<Sqlite>> {
        let mut builder = SqlitePoolOptions::new()
            .max_connections(config.max_size)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout);

        if let Some(min_idle) = config.min_idle {
            builder = builder.min_connections(min_idle);
        }

        builder
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS state_records (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                version INTEGER NOT NULL,
                expires_at INTEGER,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, key)
            )",
        )
        .execute(&self.pool)
        .await?;

        // Purge queries filter on expiry only.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_state_records_expires_at
             ON state_records(expires_at) WHERE expires_at IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn record_from_row(row: &SqliteRow) -> Result<Record> {
        let version: i64 = row.try_get("version")?;
        let expires_at: Option<i64> = row.try_get("expires_at")?;
        let updated_at: i64 = row.try_get("updated_at")?;

        Ok(Record {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            version: version as u64,
            expires_at: expires_at.and_then(DateTime::from_timestamp_millis),
            updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
        })
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> String {
    format!("{}{}", prefix, char::MAX)
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        let now = Utc::now().timestamp_millis();
        let row = sqlx::query(&format!(
            "SELECT {RETURNING_COLUMNS} FROM state_records
             WHERE collection = ? AND key = ? AND (expires_at IS NULL OR expires_at > ?)"
        ))
        .bind(collection)
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Record> {
        let now = Utc::now();
        let expires_at = expiry_from(now, ttl)?.map(|at| at.timestamp_millis());

        let row = sqlx::query(&format!(
            "INSERT INTO state_records (collection, key, value, version, expires_at, updated_at)
             VALUES (?, ?, ?, 1, ?, ?)
             ON CONFLICT(collection, key) DO UPDATE SET
                value = excluded.value,
                version = state_records.version + 1,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
             RETURNING {RETURNING_COLUMNS}"
        ))
        .bind(collection)
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .bind(now.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Self::record_from_row(&row)
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Option<Record>> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let expires_at = expiry_from(now, ttl)?.map(|at| at.timestamp_millis());

        let row = match expected {
            None => {
                // Insert, or take over a row that has already expired.
                sqlx::query(&format!(
                    "INSERT INTO state_records (collection, key, value, version, expires_at, updated_at)
                     VALUES (?, ?, ?, 1, ?, ?)
                     ON CONFLICT(collection, key) DO UPDATE SET
                        value = excluded.value,
                        version = state_records.version + 1,
                        expires_at = excluded.expires_at,
                        updated_at = excluded.updated_at
                     WHERE state_records.expires_at IS NOT NULL AND state_records.expires_at <= ?
                     RETURNING {RETURNING_COLUMNS}"
                ))
                .bind(collection)
                .bind(key)
                .bind(value)
                .bind(expires_at)
                .bind(now_ms)
                .bind(now_ms)
                .fetch_optional(&self.pool)
                .await?
            }
            Some(version) => {
                sqlx::query(&format!(
                    "UPDATE state_records
                     SET value = ?, version = version + 1, expires_at = ?, updated_at = ?
                     WHERE collection = ? AND key = ? AND version = ?
                       AND (expires_at IS NULL OR expires_at > ?)
                     RETURNING {RETURNING_COLUMNS}"
                ))
                .bind(value)
                .bind(expires_at)
                .bind(now_ms)
                .bind(collection)
                .bind(key)
                .bind(version as i64)
                .bind(now_ms)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        if row.is_none() {
            debug!(
                "CAS conflict on {}/{} (expected version {:?})",
                collection, key, expected
            );
        }

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let row = sqlx::query(
            "DELETE FROM state_records WHERE collection = ? AND key = ? RETURNING expires_at",
        )
        .bind(collection)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(false),
            Some(row) => {
                let expires_at: Option<i64> = row.try_get("expires_at")?;
                Ok(expires_at.map_or(true, |at| at > now))
            }
        }
    }

    async fn compare_and_delete(
        &self,
        collection: &str,
        key: &str,
        expected: u64,
    ) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            "DELETE FROM state_records
             WHERE collection = ? AND key = ? AND version = ?
               AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(collection)
        .bind(key)
        .bind(expected as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn scan_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Record>> {
        let now = Utc::now().timestamp_millis();

        let rows = if prefix.is_empty() {
            sqlx::query(&format!(
                "SELECT {RETURNING_COLUMNS} FROM state_records
                 WHERE collection = ? AND (expires_at IS NULL OR expires_at > ?)
                 ORDER BY key"
            ))
            .bind(collection)
            .bind(now)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(&format!(
                "SELECT {RETURNING_COLUMNS} FROM state_records
                 WHERE collection = ? AND key >= ? AND key < ?
                   AND (expires_at IS NULL OR expires_at > ?)
                 ORDER BY key"
            ))
            .bind(collection)
            .bind(prefix)
            .bind(prefix_upper_bound(prefix))
            .bind(now)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(Self::record_from_row).collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM state_records WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM state_records")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_get_roundtrip_in_memory() {
        let store = SqliteStateStore::in_memory().await.unwrap();

        let first = store.put("runs", "t1", b"one", None).await.unwrap();
        let second = store.put("runs", "t1", b"two", None).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);

        let fetched = store.get("runs", "t1").await.unwrap().unwrap();
        assert_eq!(fetched.value, b"two");
        assert!(store.get("runs", "t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_swap_semantics() {
        let store = SqliteStateStore::in_memory().await.unwrap();

        let created = store
            .compare_and_swap("locks", "singleton", None, b"a", None)
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .compare_and_swap("locks", "singleton", None, b"b", None)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .compare_and_swap("locks", "singleton", Some(created.version + 1), b"b", None)
            .await
            .unwrap()
            .is_none());

        let updated = store
            .compare_and_swap("locks", "singleton", Some(created.version), b"b", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.value, b"b");
    }

    #[tokio::test]
    async fn test_expired_row_can_be_claimed() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        store
            .put("c", "k", b"old", Some(Duration::from_millis(10)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("c", "k").await.unwrap().is_none());
        let claimed = store
            .compare_and_swap("c", "k", None, b"new", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.value, b"new");
        assert_eq!(claimed.expires_at, None);
    }

    #[tokio::test]
    async fn test_scan_prefix_range() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        for key in ["task-1/step/b", "task-1/step/a", "task-1/goal/x", "task-2/step/a"] {
            store.put("ctx", key, b"v", None).await.unwrap();
        }

        let keys: Vec<String> = store
            .scan_prefix("ctx", "task-1/step/")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["task-1/step/a", "task-1/step/b"]);
        assert_eq!(store.scan_prefix("ctx", "").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_purge_and_delete() {
        let store = SqliteStateStore::in_memory().await.unwrap();
        store
            .put("c", "gone", b"v", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        let kept = store.put("c", "kept", b"v", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);

        assert!(!store.compare_and_delete("c", "kept", kept.version + 1).await.unwrap());
        assert!(store.delete("c", "kept").await.unwrap());
        assert!(!store.delete("c", "kept").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_backed_store_shares_state_across_pools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("praxis.db");

        let a = Arc::new(SqliteStateStore::new(&path).await.unwrap());
        let b = Arc::new(SqliteStateStore::new(&path).await.unwrap());

        let won_a = a.compare_and_swap("locks", "l", None, b"a", None).await.unwrap();
        let won_b = b.compare_and_swap("locks", "l", None, b"b", None).await.unwrap();
        assert!(won_a.is_some());
        assert!(won_b.is_none());

        assert_eq!(b.get("locks", "l").await.unwrap().unwrap().value, b"a");
        a.close().await.unwrap();
        b.close().await.unwrap();
    }
}
