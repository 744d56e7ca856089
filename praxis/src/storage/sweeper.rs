//! Periodic TTL sweep for stores without native expiry.
//!
//! Reads already hide expired records; the sweeper only reclaims their space.

use super::StateStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background task that calls [`StateStore::purge_expired`] on an interval.
///
/// # Lifecycle
/// 1. Create: `TtlSweeper::new(store)`
/// 2. Configure: `.with_interval(duration)`
/// 3. Start: `.start()` returns a handle
/// 4. Shutdown: `handle.shutdown().await`
pub struct TtlSweeper {
    store: Arc<dyn StateStore>,
    interval: Duration,
}

impl TtlSweeper {
    /// Default sweep interval is one minute.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            interval: Duration::from_secs(60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn start(self) -> TtlSweeperHandle {
        let token = CancellationToken::new();
        let child = token.child_token();

        let handle = tokio::spawn(async move {
            info!("TTL sweeper started (interval={:?})", self.interval);

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = child.cancelled() => break,

                    _ = ticker.tick() => {
                        match self.store.purge_expired(Utc::now()).await {
                            Ok(0) => {}
                            Ok(purged) => debug!("TTL sweeper purged {} expired records", purged),
                            Err(e) => warn!("TTL sweep failed (will retry next tick): {}", e),
                        }
                    }
                }
            }

            info!("TTL sweeper stopped");
        });

        TtlSweeperHandle { handle, token }
    }
}

/// Handle for stopping a running [`TtlSweeper`].
pub struct TtlSweeperHandle {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

impl TtlSweeperHandle {
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStateStore;

    #[tokio::test]
    async fn test_sweeper_purges_expired_records() {
        let store = Arc::new(InMemoryStateStore::new());
        store
            .put("c", "k", b"v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        store.put("c", "keep", b"v", None).await.unwrap();

        let handle = TtlSweeper::new(store.clone())
            .with_interval(Duration::from_millis(20))
            .start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_running());
        handle.shutdown().await;

        assert_eq!(store.len(), 1);
    }
}
