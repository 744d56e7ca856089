//! Execution lock behaviour across several holders sharing one store.
//!
//! Each `ExecutionLock` stands in for a separate process.

mod common;

use futures::future::join_all;
use praxis::lock::{ExecutionLock, LockConfig};
use praxis::storage::{InMemoryStateStore, StateStore};
use std::sync::Arc;
use std::time::Duration;

fn process(store: &Arc<dyn StateStore>, config: &LockConfig) -> ExecutionLock {
    ExecutionLock::new(Arc::clone(store), config.clone())
}

#[tokio::test]
async fn test_second_process_is_rejected_until_release() {
    common::init_tracing();
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let config = LockConfig::default();
    let a = process(&store, &config);
    let b = process(&store, &config);

    assert!(a.acquire("thread-a").await.unwrap());
    assert!(!b.acquire("thread-b").await.unwrap());
    assert!(b.is_locked().await.unwrap());
    assert!(!b.holds_lock().await.unwrap());

    let current = b.current().await.unwrap().unwrap();
    assert_eq!(current.holder_id.as_deref(), Some(a.holder_id()));
    assert_eq!(current.thread_id.as_deref(), Some("thread-a"));

    // Only the holder can release.
    assert!(!b.release().await.unwrap());
    assert!(a.release().await.unwrap());

    assert!(b.acquire("thread-b").await.unwrap());
    assert!(b.holds_lock().await.unwrap());
    b.release().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_acquire_has_one_winner() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let config = LockConfig::default();
    let locks: Vec<Arc<ExecutionLock>> = (0..8).map(|_| Arc::new(process(&store, &config))).collect();

    let attempts = locks.iter().enumerate().map(|(i, lock)| {
        let lock = Arc::clone(lock);
        tokio::spawn(async move { lock.acquire(&format!("thread-{}", i)).await.unwrap() })
    });
    let won: Vec<bool> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(won.iter().filter(|w| **w).count(), 1);
    for lock in &locks {
        lock.release().await.unwrap();
    }
}

#[tokio::test]
async fn test_stale_holder_is_taken_over() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    // Heartbeat far slower than the stale timeout: the holder looks dead.
    let config = LockConfig::default()
        .with_stale_timeout(Duration::from_millis(100))
        .with_heartbeat_interval(Duration::from_secs(60));
    let a = process(&store, &config);
    let b = process(&store, &config);

    assert!(a.acquire("thread-a").await.unwrap());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!a.is_locked().await.unwrap());

    assert!(b.acquire("thread-b").await.unwrap());
    assert!(b.holds_lock().await.unwrap());

    // The previous holder cannot free the lock it lost.
    assert!(!a.release().await.unwrap());
    assert!(b.holds_lock().await.unwrap());
    b.release().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_keeps_lock_fresh() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let config = LockConfig::default()
        .with_stale_timeout(Duration::from_millis(400))
        .with_heartbeat_interval(Duration::from_millis(50));
    let a = process(&store, &config);
    let b = process(&store, &config);

    assert!(a.acquire("long-run").await.unwrap());
    tokio::time::sleep(Duration::from_millis(900)).await;

    assert!(b.is_locked().await.unwrap());
    assert!(!b.acquire("impatient").await.unwrap());
    a.release().await.unwrap();
}

#[tokio::test]
async fn test_startup_sweep_clears_crashed_holder() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let config = LockConfig::default()
        .with_stale_timeout(Duration::from_millis(100))
        .with_heartbeat_interval(Duration::from_millis(10));

    {
        let crashed = process(&store, &config);
        assert!(crashed.acquire("interrupted").await.unwrap());
        // Dropped without release: heartbeat stops, record stays.
    }

    let restarted = process(&store, &config);
    assert!(!restarted.sweep_stale().await.unwrap());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(restarted.sweep_stale().await.unwrap());

    let current = restarted.current().await.unwrap().unwrap();
    assert!(current.is_free());
    assert!(!restarted.sweep_stale().await.unwrap());
}
