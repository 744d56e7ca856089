//! Tiered session cache.
//!
//! Three in-process layers sit in front of one [`StateStore`] collection:
//!
//! 1. [`HotMap`]: pinned, actively referenced objects. No eviction.
//! 2. [`WriteBuffer`]: writes not yet persisted. Bounded; a full buffer
//!    drops its oldest pending write instead of blocking.
//! 3. [`WarmCache`]: size- and TTL-bounded LRU of recent reads and writes.
//!
//! Nothing here is shared across processes.

mod hot;
mod warm;
mod write_buffer;

pub use hot::HotMap;
pub use warm::{CacheStats, WarmCache};
pub use write_buffer::{PendingWrite, WriteBuffer};

use crate::config::serde_secs;
use crate::core::{deserialize_value, serialize_value};
use crate::storage::{Result, StateStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub write_buffer_capacity: usize,
    pub warm_capacity: usize,
    #[serde(with = "serde_secs")]
    pub warm_ttl: Duration,
    #[serde(with = "serde_secs")]
    pub flush_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            write_buffer_capacity: 1_000,
            warm_capacity: 1_024,
            warm_ttl: Duration::from_secs(300),
            flush_interval: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    pub fn with_write_buffer_capacity(mut self, capacity: usize) -> Self {
        self.write_buffer_capacity = capacity;
        self
    }

    pub fn with_warm_capacity(mut self, capacity: usize) -> Self {
        self.warm_capacity = capacity;
        self
    }

    pub fn with_warm_ttl(mut self, ttl: Duration) -> Self {
        self.warm_ttl = ttl;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

/// Session state cache over a single store collection.
///
/// # Example
///
/// ```
/// use praxis::cache::{CacheConfig, SessionCache};
/// use praxis::storage::InMemoryStateStore;
/// use std::sync::Arc;
///
/// # async fn example() -> praxis::storage::Result<()> {
/// let cache: SessionCache<String> =
///     SessionCache::new(Arc::new(InMemoryStateStore::new()), "sessions", CacheConfig::default());
///
/// cache.write("affair:billing", "refund pending".to_string());
/// assert_eq!(cache.read("affair:billing").await?.as_deref(), Some("refund pending"));
/// assert_eq!(cache.flush().await, 1);
/// # Ok(())
/// # }
/// ```
pub struct SessionCache<V> {
    store: Arc<dyn StateStore>,
    collection: String,
    hot: HotMap<String, V>,
    buffer: WriteBuffer<V>,
    warm: WarmCache<V>,
}

impl<V> SessionCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn StateStore>, collection: impl Into<String>, config: CacheConfig) -> Self {
        Self {
            store,
            collection: collection.into(),
            hot: HotMap::new(),
            buffer: WriteBuffer::new(config.write_buffer_capacity),
            warm: WarmCache::new(config.warm_capacity, Some(config.warm_ttl)),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Keeps `value` in the hot layer until [`SessionCache::unpin`].
    pub fn pin(&self, key: impl Into<String>, value: V) {
        self.hot.insert(key.into(), value);
    }

    pub fn pinned(&self, key: &str) -> Option<V> {
        self.hot.get(&key.to_string())
    }

    pub fn unpin(&self, key: &str) -> Option<V> {
        self.hot.remove(&key.to_string())
    }

    /// Caches `value` and queues it for the next flush.
    pub fn write(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        self.warm.put(key.clone(), value.clone());
        self.buffer.push(key, value);
    }

    /// Reads through warm cache, then pending writes, then the store.
    pub async fn read(&self, key: &str) -> Result<Option<V>> {
        if let Some(value) = self.warm.get(key) {
            return Ok(Some(value));
        }
        if let Some(value) = self.buffer.pending(key) {
            self.warm.put(key, value.clone());
            return Ok(Some(value));
        }

        let Some(record) = self.store.get(&self.collection, key).await? else {
            return Ok(None);
        };
        let value: V = deserialize_value(&record.value)?;
        self.warm.put(key, value.clone());
        Ok(Some(value))
    }

    /// Drops the warm copy. A pending write for `key` is still flushed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.warm.invalidate(key)
    }

    pub fn pending_writes(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.warm.stats()
    }

    /// Persists every pending write. Returns how many reached the store.
    ///
    /// Writes that fail with a storage error go back to the front of the
    /// buffer for the next flush.
    pub async fn flush(&self) -> usize {
        let pending = self.buffer.drain();
        if pending.is_empty() {
            return 0;
        }

        let mut written = 0;
        let mut failed = Vec::new();
        for write in pending {
            let bytes = match serialize_value(&write.value) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Dropping unserializable write for key={}: {}", write.key, e);
                    continue;
                }
            };
            match self.store.put(&self.collection, &write.key, &bytes, None).await {
                Ok(_) => written += 1,
                Err(e) => {
                    warn!("Flush of key={} failed, requeueing: {}", write.key, e);
                    failed.push(write);
                }
            }
        }

        if !failed.is_empty() {
            self.buffer.requeue_front(failed);
        }
        debug!("Flushed {} pending writes to {}", written, self.collection);
        written
    }

    /// Clears every layer. Pending writes are discarded.
    pub fn clear(&self) {
        self.hot.clear();
        self.buffer.clear();
        self.warm.clear();
    }

    /// Spawns a task that flushes every `interval` and once more on shutdown.
    pub fn start_flusher(self: &Arc<Self>, interval: Duration) -> FlusherHandle {
        let cache = Arc::clone(self);
        let token = CancellationToken::new();
        let child = token.child_token();

        let handle = tokio::spawn(async move {
            info!(
                "Write-buffer flusher started (collection={}, interval={:?})",
                cache.collection, interval
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = child.cancelled() => {
                        let written = cache.flush().await;
                        info!("Write-buffer flusher stopped (final flush wrote {})", written);
                        break;
                    }

                    _ = ticker.tick() => {
                        cache.flush().await;
                    }
                }
            }
        });

        FlusherHandle { handle, token }
    }
}

/// Handle for stopping a flusher started by [`SessionCache::start_flusher`].
pub struct FlusherHandle {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl FlusherHandle {
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
