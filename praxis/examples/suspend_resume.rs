//! Suspend/Resume Demo
//!
//! This example demonstrates:
//! - A workflow node dispatching an external job and suspending on it
//! - The job watcher resuming the run once the job finishes
//! - A second suspension on a human approval, resumed by the caller
//! - The execution lock released between every step
//!
//! ## Scenario
//! A release ticket is triaged, a build job is dispatched to a (simulated)
//! external runner, and the push is gated on approval. The runner finishes
//! builds after a short delay on its own tasks.
//!
//! ## Run with
//! ```bash
//! RUST_LOG=info cargo run --example suspend_resume
//! ```

use dashmap::DashMap;
use praxis::approval::GIT_PUSH;
use praxis::prelude::*;
use praxis::workflow::RunStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Release {
    log: Vec<String>,
    artifact: Option<Value>,
    pushed: bool,
}

enum ReleaseDelta {
    Note(String),
    Built(Value),
    Pushed(bool),
}

impl WorkflowState for Release {
    type Delta = ReleaseDelta;

    fn apply(&mut self, delta: ReleaseDelta) {
        match delta {
            ReleaseDelta::Note(note) => self.log.push(note),
            ReleaseDelta::Built(artifact) => self.artifact = Some(artifact),
            ReleaseDelta::Pushed(pushed) => self.pushed = pushed,
        }
    }

    fn summary(&self) -> String {
        self.log.join("; ")
    }
}

/// Runner that "builds" for 300ms on a background task.
#[derive(Default)]
struct SimulatedRunner {
    jobs: Arc<DashMap<String, JobStatus>>,
    next: AtomicUsize,
}

#[async_trait]
impl JobRunner for SimulatedRunner {
    async fn dispatch(&self, spec: &JobSpec) -> Result<String, BoxError> {
        let job_id = format!("{}-{}", spec.kind, self.next.fetch_add(1, Ordering::SeqCst));
        self.jobs.insert(job_id.clone(), JobStatus::Running);

        let jobs = Arc::clone(&self.jobs);
        let id = job_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            jobs.insert(id, JobStatus::Succeeded);
        });
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, BoxError> {
        Ok(self.jobs.get(job_id).map(|s| *s).unwrap_or(JobStatus::NotFound))
    }

    async fn result(&self, job_id: &str) -> Result<Value, BoxError> {
        Ok(json!({"image": format!("registry.local/app:{}", job_id)}))
    }
}

async fn build(runner: Arc<SimulatedRunner>, ctx: NodeContext) -> Result<NodeOutput<ReleaseDelta>, BoxError> {
    match ctx.resume_as::<JobResult>()? {
        None => {
            let job_id = runner.dispatch(&JobSpec::new("build", json!({"target": "release"}))).await?;
            println!("  dispatched {}", job_id);
            Ok(NodeOutput::Suspend(Interrupt::external_job(job_id, json!({}))))
        }
        Some(result) if result.success => Ok(NodeOutput::Update(ReleaseDelta::Built(result.output))),
        Some(result) => Err(format!("build failed: {:?}", result.error).into()),
    }
}

async fn push(ctx: NodeContext) -> Result<NodeOutput<ReleaseDelta>, BoxError> {
    let request = ApprovalRequest::new(GIT_PUSH, "push", "Push release branch to origin")
        .with_context("branch", "release/1.4");
    match approval_gate(&ctx, request)? {
        GateDecision::Pending(suspend) => Ok(suspend),
        GateDecision::Approved => Ok(NodeOutput::Update(ReleaseDelta::Pushed(true))),
        GateDecision::Rejected(_) => Ok(NodeOutput::Update(ReleaseDelta::Pushed(false))),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let runner = Arc::new(SimulatedRunner::default());
    let graph = WorkflowGraph::new()
        .add_node(
            "triage",
            node_fn(|_: Release, _: NodeContext| async {
                Ok::<_, BoxError>(NodeOutput::Update(ReleaseDelta::Note("triaged".into())))
            }),
        )
        .add_node("build", {
            let runner = Arc::clone(&runner);
            node_fn(move |_: Release, ctx: NodeContext| build(Arc::clone(&runner), ctx))
        })
        .add_node("push", node_fn(|_: Release, ctx: NodeContext| push(ctx)))
        .set_entry("triage")
        .add_edge("triage", "build")
        .add_edge("build", "push")
        .add_edge("push", END);

    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let config = praxis::OrchestratorConfig::from_json_str(r#"{"watcher": {"poll_interval": 0.1}}"#)?;
    let orchestrator = Orchestrator::builder(store, graph, runner).config(config).build()?;
    orchestrator.startup().await?;
    let watcher = orchestrator.start_watcher();

    println!("=== run release-1.4 ===");
    if let RunAttempt::Finished(outcome) = orchestrator.run("release-1.4", Release::default()).await? {
        println!("  run is {}", outcome.status());
    }

    println!("=== waiting for the build ===");
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let Some(run) = orchestrator.machine().load_run("release-1.4").await? else {
            continue;
        };
        let awaiting_approval = run
            .suspension
            .as_ref()
            .is_some_and(|s| matches!(s.interrupt, Interrupt::Approval { .. }));
        if awaiting_approval {
            println!("  build finished, push awaits approval");
            break;
        }
        if run.status == RunStatus::Failed {
            println!("  run failed: {:?}", run.error);
            watcher.shutdown().await;
            return Ok(());
        }
    }

    println!("=== approving push ===");
    match orchestrator.resume("release-1.4", ApprovalResponse::approve().to_value()).await? {
        RunAttempt::Finished(Outcome::Completed(release)) => {
            println!("  completed: artifact={:?} pushed={}", release.artifact, release.pushed);
        }
        RunAttempt::Finished(other) => println!("  run ended as {}", other.status()),
        RunAttempt::Busy => println!("  lock busy, try again"),
    }

    watcher.shutdown().await;
    Ok(())
}
