//! Shared state store adapter.
//!
//! Every other component persists through the [`StateStore`] trait, which
//! exposes exactly the three primitives the execution core relies on:
//!
//! - atomic conditional upsert (compare-and-swap on a record version)
//! - per-record TTL expiry
//! - ordered range scans over a key prefix
//!
//! Backends:
//!
//! - [`InMemoryStateStore`]: DashMap-backed store for tests and single-process use
//! - [`SqliteStateStore`]: durable sqlx/SQLite store (feature `sqlite`)
//! - [`RedisStateStore`]: fleet-shared Redis store with native expiry (feature `redis`)
//!
//! Stores without native TTL expiry hide expired records from reads and rely
//! on a [`TtlSweeper`] to physically remove them.
//!
//! # Example
//!
//! ```
//! use praxis::storage::{InMemoryStateStore, StateStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryStateStore::new();
//! let first = store.compare_and_swap("runs", "t1", None, b"{}", None).await?;
//! assert!(first.is_some());
//!
//! // A second create-if-absent loses.
//! let second = store.compare_and_swap("runs", "t1", None, b"{}", None).await?;
//! assert!(second.is_none());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

mod error;
mod sweeper;

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "redis")]
pub mod redis;

pub use error::{Result, StorageError};
pub use memory::InMemoryStateStore;
pub use sweeper::{TtlSweeper, TtlSweeperHandle};

#[cfg(feature = "sqlite")]
pub use sqlite::{PoolConfig, SqliteStateStore};

#[cfg(feature = "redis")]
pub use redis::RedisStateStore;

/// A versioned document held by a [`StateStore`].
///
/// `version` is an opaque token that strictly increases on every write to
/// the same key. Callers hand it back to [`StateStore::compare_and_swap`]
/// to prove they are updating the revision they read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
    pub version: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Returns true if the record has not expired at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Trait for durable document stores.
///
/// All operations are scoped by a `collection` name. Expired records behave
/// as absent for every read and conditional write, whether or not they have
/// been physically purged yet.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch a live record.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>>;

    /// Unconditionally upsert a record. Replaces the TTL.
    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Record>;

    /// Atomically write `value` only if the live record's version equals
    /// `expected`. `expected = None` means the record must be absent (or
    /// expired). Returns `None` when the condition does not hold.
    async fn compare_and_swap(
        &self,
        collection: &str,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Option<Record>>;

    /// Delete a record. Returns true if a live record was removed.
    async fn delete(&self, collection: &str, key: &str) -> Result<bool>;

    /// Delete a record only if its live version equals `expected`.
    async fn compare_and_delete(&self, collection: &str, key: &str, expected: u64)
        -> Result<bool>;

    /// Return all live records whose key starts with `prefix`, in ascending key order.
    async fn scan_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Record>>;

    /// Physically remove records that expired at or before `now`.
    /// Returns the number of records removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Remove every record. Intended for tests.
    async fn reset(&self) -> Result<()>;

    /// Release backend resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Computes an absolute expiry from a relative TTL.
pub(crate) fn expiry_from(now: DateTime<Utc>, ttl: Option<Duration>) -> Result<Option<DateTime<Utc>>> {
    let Some(ttl) = ttl else {
        return Ok(None);
    };

    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .map(Some)
        .ok_or_else(|| StorageError::InvalidParameter(format!("ttl out of range: {:?}", ttl)))
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        (**self).get(collection, key).await
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Record> {
        (**self).put(collection, key, value, ttl).await
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Option<Record>> {
        (**self)
            .compare_and_swap(collection, key, expected, value, ttl)
            .await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        (**self).delete(collection, key).await
    }

    async fn compare_and_delete(
        &self,
        collection: &str,
        key: &str,
        expected: u64,
    ) -> Result<bool> {
        (**self).compare_and_delete(collection, key, expected).await
    }

    async fn scan_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Record>> {
        (**self).scan_prefix(collection, prefix).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        (**self).purge_expired(now).await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        (**self).get(collection, key).await
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Record> {
        (**self).put(collection, key, value, ttl).await
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Option<Record>> {
        (**self)
            .compare_and_swap(collection, key, expected, value, ttl)
            .await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        (**self).delete(collection, key).await
    }

    async fn compare_and_delete(
        &self,
        collection: &str,
        key: &str,
        expected: u64,
    ) -> Result<bool> {
        (**self).compare_and_delete(collection, key, expected).await
    }

    async fn scan_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Record>> {
        (**self).scan_prefix(collection, prefix).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        (**self).purge_expired(now).await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
