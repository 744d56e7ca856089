//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use dashmap::DashMap;
use praxis::prelude::*;
use praxis::watcher::JobSpec;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Job runner whose job statuses are set by the test.
#[derive(Default)]
pub struct FakeRunner {
    statuses: DashMap<String, JobStatus>,
    outputs: DashMap<String, Value>,
    dispatched: AtomicUsize,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn start_job(&self, job_id: &str) {
        self.statuses.insert(job_id.to_string(), JobStatus::Running);
    }

    pub fn finish_job(&self, job_id: &str, output: Value) {
        self.outputs.insert(job_id.to_string(), output);
        self.statuses.insert(job_id.to_string(), JobStatus::Succeeded);
    }

    pub fn fail_job(&self, job_id: &str) {
        self.statuses.insert(job_id.to_string(), JobStatus::Failed);
    }

    /// The job disappears from the runner.
    pub fn forget_job(&self, job_id: &str) {
        self.statuses.remove(job_id);
        self.outputs.remove(job_id);
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn dispatch(&self, _spec: &JobSpec) -> Result<String, BoxError> {
        let n = self.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
        let job_id = format!("job-{}", n);
        self.start_job(&job_id);
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, BoxError> {
        Ok(self
            .statuses
            .get(job_id)
            .map(|s| *s.value())
            .unwrap_or(JobStatus::NotFound))
    }

    async fn result(&self, job_id: &str) -> Result<Value, BoxError> {
        Ok(self
            .outputs
            .get(job_id)
            .map(|v| v.value().clone())
            .unwrap_or(Value::Null))
    }
}

/// Workflow state used across the tests: a log of visited steps plus the
/// outcome of the external job the run waited on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub steps: Vec<String>,
    pub job: Option<JobResult>,
}

pub enum TicketDelta {
    Step(String),
    JobFinished(JobResult),
}

impl WorkflowState for Ticket {
    type Delta = TicketDelta;

    fn apply(&mut self, delta: TicketDelta) {
        match delta {
            TicketDelta::Step(step) => self.steps.push(step),
            TicketDelta::JobFinished(result) => self.job = Some(result),
        }
    }

    fn summary(&self) -> String {
        format!("completed steps: {}", self.steps.join(", "))
    }
}

pub fn step(name: &'static str) -> impl Node<Ticket> {
    node_fn(move |_: Ticket, _: NodeContext| async move {
        Ok::<_, BoxError>(NodeOutput::Update(TicketDelta::Step(name.to_string())))
    })
}

/// Suspends on `job_id` until resumed with a [`JobResult`].
pub fn await_job(job_id: &'static str) -> impl Node<Ticket> {
    node_fn(move |_: Ticket, ctx: NodeContext| wait_for_job(job_id, ctx))
}

async fn wait_for_job(job_id: &str, ctx: NodeContext) -> Result<NodeOutput<TicketDelta>, BoxError> {
    match ctx.resume_as::<JobResult>()? {
        Some(result) => Ok(NodeOutput::Update(TicketDelta::JobFinished(result))),
        None => Ok(NodeOutput::Suspend(Interrupt::external_job(
            job_id,
            json!({"kind": "build"}),
        ))),
    }
}

/// plan -> await_job -> report -> END
pub fn job_graph(job_id: &'static str) -> WorkflowGraph<Ticket> {
    WorkflowGraph::new()
        .add_node("plan", step("plan"))
        .add_node("await_job", await_job(job_id))
        .add_node("report", step("report"))
        .set_entry("plan")
        .add_edge("plan", "await_job")
        .add_edge("await_job", "report")
        .add_edge("report", END)
}
