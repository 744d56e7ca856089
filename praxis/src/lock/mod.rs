//! Fleet-wide execution lock.
//!
//! A single-slot advisory lock over the shared store: at most one workflow
//! run executes across every process at a time. Ownership changes only
//! through compare-and-swap on the singleton [`LockRecord`]:
//!
//! - acquire: free record -> this holder
//! - takeover: stale record (no heartbeat within `stale_timeout`) -> this
//!   holder, conditional on the exact revision that was judged stale
//! - release: this holder -> free; a no-op if someone else holds it
//!
//! While held, a heartbeat task refreshes `acquired_at` every
//! `heartbeat_interval`.

mod record;

pub use record::LockRecord;

use crate::config::{serde_secs, ConfigError};
use crate::core::{deserialize_value, serialize_value};
use crate::storage::{Record, Result, StateStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LOCK_COLLECTION: &str = "locks";
pub const DEFAULT_LOCK_KEY: &str = "execution_lock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// A holder without a heartbeat for this long may be taken over.
    #[serde(with = "serde_secs")]
    pub stale_timeout: Duration,
    #[serde(with = "serde_secs")]
    pub heartbeat_interval: Duration,
    /// Record key of the singleton.
    pub key: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(300),
            heartbeat_interval: Duration::from_secs(10),
            key: DEFAULT_LOCK_KEY.to_string(),
        }
    }
}

impl LockConfig {
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// The heartbeat must fire at least five times per staleness window.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::invalid("lock.heartbeat_interval", "must be positive"));
        }
        if self.key.is_empty() {
            return Err(ConfigError::invalid("lock.key", "must be non-empty"));
        }
        if self.heartbeat_interval * 5 >= self.stale_timeout {
            return Err(ConfigError::invalid(
                "lock.heartbeat_interval",
                format!(
                    "heartbeat_interval * 5 ({:?}) must be less than stale_timeout ({:?})",
                    self.heartbeat_interval * 5,
                    self.stale_timeout
                ),
            ));
        }
        Ok(())
    }
}

struct Heartbeat {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle on the singleton lock for one process.
///
/// # Lifecycle
/// 1. Create: `ExecutionLock::new(store, config)` (one per process)
/// 2. Startup: `sweep_stale()` clears locks left by crashed processes
/// 3. Per run: `acquire(thread_id)`, execute, `release()`
pub struct ExecutionLock {
    store: Arc<dyn StateStore>,
    config: LockConfig,
    holder_id: String,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl ExecutionLock {
    pub fn new(store: Arc<dyn StateStore>, config: LockConfig) -> Self {
        let holder_id = format!("{}-{}", std::process::id(), Uuid::new_v4());
        Self {
            store,
            config,
            holder_id,
            heartbeat: Mutex::new(None),
        }
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Tries to take the lock for `thread_id`. Never blocks waiting for it.
    ///
    /// Returns `Ok(false)` when a live holder exists or another process won
    /// the race.
    pub async fn acquire(&self, thread_id: &str) -> Result<bool> {
        let now = Utc::now();
        let mine = serialize_value(&LockRecord::held_by(&self.holder_id, thread_id, now))?;

        let expected = match self.read().await? {
            None => None,
            Some((record, current)) => {
                if current.is_free() {
                    Some(record.version)
                } else if current.is_stale(now, self.config.stale_timeout) {
                    warn!(
                        "Taking over stale execution lock (previous_holder={:?}, thread_id={:?}, acquired_at={:?})",
                        current.holder_id, current.thread_id, current.acquired_at
                    );
                    Some(record.version)
                } else {
                    debug!(
                        "Execution lock busy (holder={:?}, thread_id={:?})",
                        current.holder_id, current.thread_id
                    );
                    return Ok(false);
                }
            }
        };

        let swapped = self
            .store
            .compare_and_swap(LOCK_COLLECTION, &self.config.key, expected, &mine, None)
            .await?;
        if swapped.is_none() {
            debug!("Lost execution lock race for thread_id={}", thread_id);
            return Ok(false);
        }

        info!(
            "Acquired execution lock (holder={}, thread_id={})",
            self.holder_id, thread_id
        );
        self.start_heartbeat();
        Ok(true)
    }

    /// Stops the heartbeat and frees the lock if this process still holds it.
    ///
    /// Returns true when the record was cleared.
    pub async fn release(&self) -> Result<bool> {
        self.stop_heartbeat().await;

        let Some((record, current)) = self.read().await? else {
            return Ok(false);
        };
        if !current.is_held_by(&self.holder_id) {
            debug!(
                "Release skipped, lock is held by {:?}",
                current.holder_id
            );
            return Ok(false);
        }

        let free = serialize_value(&LockRecord::default())?;
        let cleared = self
            .store
            .compare_and_swap(LOCK_COLLECTION, &self.config.key, Some(record.version), &free, None)
            .await?
            .is_some();
        if cleared {
            info!("Released execution lock (holder={})", self.holder_id);
        }
        Ok(cleared)
    }

    /// True when some process holds the lock and its heartbeat is fresh.
    pub async fn is_locked(&self) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .read()
            .await?
            .is_some_and(|(_, current)| current.is_live(now, self.config.stale_timeout)))
    }

    /// True when this process is the live holder.
    pub async fn holds_lock(&self) -> Result<bool> {
        let now = Utc::now();
        Ok(self.read().await?.is_some_and(|(_, current)| {
            current.is_held_by(&self.holder_id) && current.is_live(now, self.config.stale_timeout)
        }))
    }

    pub async fn current(&self) -> Result<Option<LockRecord>> {
        Ok(self.read().await?.map(|(_, current)| current))
    }

    /// Clears a stale lock. Run once at process startup.
    pub async fn sweep_stale(&self) -> Result<bool> {
        let Some((record, current)) = self.read().await? else {
            return Ok(false);
        };
        if !current.is_stale(Utc::now(), self.config.stale_timeout) {
            return Ok(false);
        }

        let free = serialize_value(&LockRecord::default())?;
        let cleared = self
            .store
            .compare_and_swap(LOCK_COLLECTION, &self.config.key, Some(record.version), &free, None)
            .await?
            .is_some();
        if cleared {
            warn!(
                "Cleared stale execution lock at startup (holder={:?}, thread_id={:?}, acquired_at={:?})",
                current.holder_id, current.thread_id, current.acquired_at
            );
        }
        Ok(cleared)
    }

    async fn read(&self) -> Result<Option<(Record, LockRecord)>> {
        read_lock(self.store.as_ref(), &self.config.key).await
    }

    fn start_heartbeat(&self) {
        let token = CancellationToken::new();
        let child = token.child_token();
        let store = Arc::clone(&self.store);
        let key = self.config.key.clone();
        let holder_id = self.holder_id.clone();
        let interval = self.config.heartbeat_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; acquire just wrote a fresh timestamp.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = child.cancelled() => break,

                    _ = ticker.tick() => {
                        match refresh(store.as_ref(), &key, &holder_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!("Execution lock lost during heartbeat (holder={})", holder_id);
                                break;
                            }
                            Err(e) => warn!("Lock heartbeat failed (will retry next tick): {}", e),
                        }
                    }
                }
            }
        });

        let previous = self.heartbeat_slot().replace(Heartbeat { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    async fn stop_heartbeat(&self) {
        let heartbeat = self.heartbeat_slot().take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.token.cancel();
            let _ = heartbeat.handle.await;
        }
    }

    fn heartbeat_slot(&self) -> MutexGuard<'_, Option<Heartbeat>> {
        self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ExecutionLock {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat_slot().take() {
            heartbeat.token.cancel();
        }
    }
}

async fn read_lock(store: &dyn StateStore, key: &str) -> Result<Option<(Record, LockRecord)>> {
    match store.get(LOCK_COLLECTION, key).await? {
        None => Ok(None),
        Some(record) => {
            let current: LockRecord = deserialize_value(&record.value)?;
            Ok(Some((record, current)))
        }
    }
}

/// Bumps `acquired_at`. Returns false once the record names another holder.
async fn refresh(store: &dyn StateStore, key: &str, holder_id: &str) -> Result<bool> {
    let Some((record, mut current)) = read_lock(store, key).await? else {
        return Ok(false);
    };
    if !current.is_held_by(holder_id) {
        return Ok(false);
    }

    current.acquired_at = Some(Utc::now());
    let bytes = serialize_value(&current)?;
    // A lost race here means someone else wrote; the next tick re-reads.
    store
        .compare_and_swap(LOCK_COLLECTION, key, Some(record.version), &bytes, None)
        .await?;
    Ok(true)
}
