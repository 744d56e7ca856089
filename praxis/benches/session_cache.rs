use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use praxis::cache::{CacheConfig, SessionCache};
use praxis::storage::{InMemoryStateStore, StateStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Session {
    user: String,
    turns: Vec<String>,
}

fn session(i: usize) -> Session {
    Session {
        user: format!("user-{}", i),
        turns: (0..8).map(|t| format!("turn {} of session {}", t, i)).collect(),
    }
}

fn cache(config: CacheConfig) -> SessionCache<Session> {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    SessionCache::new(store, "sessions", config)
}

// =============================================================================
// Read paths
// =============================================================================

fn bench_reads(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("session_cache_read");

    let warm = cache(CacheConfig::default());
    warm.write("hot-key", session(0));
    group.bench_function("warm_hit", |b| {
        b.to_async(&rt).iter(|| async { black_box(warm.read("hot-key").await.unwrap()) })
    });

    let cold = cache(CacheConfig::default());
    rt.block_on(async {
        cold.write("cold-key", session(1));
        cold.flush().await;
    });
    group.bench_function("store_fallthrough", |b| {
        b.to_async(&rt).iter(|| async {
            cold.invalidate("cold-key");
            black_box(cold.read("cold-key").await.unwrap())
        })
    });

    group.finish();
}

// =============================================================================
// Write buffering
// =============================================================================

fn bench_write_and_flush(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("session_cache_flush");

    for batch in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.to_async(&rt).iter(|| async move {
                let cache = cache(CacheConfig::default().with_write_buffer_capacity(batch));
                for i in 0..batch {
                    cache.write(format!("session-{}", i), session(i));
                }
                black_box(cache.flush().await)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reads, bench_write_and_flush);
criterion_main!(benches);
