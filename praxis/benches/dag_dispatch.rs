use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use praxis::dag::{
    handler_fn, DagConfig, DagExecutor, Delegation, ExecutionPlan, HandlerRegistry, PlanContext,
    TaskOutput,
};
use serde_json::json;

fn executor(config: DagConfig) -> DagExecutor {
    let handlers = HandlerRegistry::new().with(
        "noop",
        handler_fn(|input, _| async move {
            tokio::task::yield_now().await;
            Ok(TaskOutput::success(input))
        }),
    );
    DagExecutor::new(handlers, config)
}

/// `width` delegations per group, `depth` groups.
fn plan(width: usize, depth: usize) -> ExecutionPlan {
    let mut delegations = Vec::with_capacity(width * depth);
    let mut groups = Vec::with_capacity(depth);
    for level in 0..depth {
        let mut group = Vec::with_capacity(width);
        for i in 0..width {
            let id = format!("d{}-{}", level, i);
            delegations.push(Delegation::new(id.as_str(), "noop", json!({"i": i})));
            group.push(id);
        }
        groups.push(group);
    }
    ExecutionPlan::new(delegations, groups).unwrap()
}

fn bench_group_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("dag_fan_out");
    let parallel = executor(DagConfig::default());

    for width in [1usize, 8, 64] {
        let plan = plan(width, 4);
        group.bench_with_input(BenchmarkId::from_parameter(width), &plan, |b, plan| {
            b.to_async(&rt).iter(|| async {
                black_box(parallel.execute_plan(plan, &PlanContext::new("bench")).await)
            })
        });
    }

    group.finish();
}

fn bench_sequential_vs_grouped(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("dag_mode");
    let plan = plan(16, 4);

    let grouped = executor(DagConfig::default());
    group.bench_function("grouped", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(grouped.execute_plan(&plan, &PlanContext::new("bench")).await) })
    });

    let sequential = executor(DagConfig::default().with_sequential(true));
    group.bench_function("sequential", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(sequential.execute_plan(&plan, &PlanContext::new("bench")).await)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_group_fan_out, bench_sequential_vs_grouped);
criterion_main!(benches);
