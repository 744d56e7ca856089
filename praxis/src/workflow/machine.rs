use super::checkpoint::{Checkpointer, RunStatus, Suspension, WorkflowRun};
use super::graph::{CompiledGraph, END};
use super::{Interrupt, NodeContext, NodeOutput, Result, StateBlob, WorkflowConfig, WorkflowError, WorkflowState};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Why a run stopped with a failure, with whatever it had achieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub node: String,
    pub error: String,
    /// Best-effort account of the work completed before the failure.
    pub summary: String,
}

/// How a call to [`StateMachine::execute`] or [`StateMachine::resume`] ended.
#[derive(Debug, Clone)]
pub enum Outcome<S> {
    Completed(S),
    Suspended(Suspension),
    Failed(FailureReport),
}

impl<S> Outcome<S> {
    pub fn status(&self) -> RunStatus {
        match self {
            Outcome::Completed(_) => RunStatus::Completed,
            Outcome::Suspended(_) => RunStatus::Suspended,
            Outcome::Failed(_) => RunStatus::Failed,
        }
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        match self {
            Outcome::Suspended(suspension) => Some(suspension),
            _ => None,
        }
    }

    pub fn report(&self, thread_id: impl Into<String>) -> RunReport {
        RunReport {
            thread_id: thread_id.into(),
            status: self.status(),
            suspension: self.suspension().cloned(),
            error: match self {
                Outcome::Failed(failure) => Some(failure.error.clone()),
                _ => None,
            },
        }
    }
}

/// State-agnostic view of an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<Suspension>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Anything that can re-enter a suspended run.
#[async_trait]
pub trait ResumeTarget: Send + Sync {
    async fn resume_run(&self, thread_id: &str, value: Value) -> Result<RunReport>;

    /// Resumes only while the run is still suspended under `token`.
    async fn resume_if_token(&self, thread_id: &str, token: &str, value: Value) -> Result<RunReport>;
}

/// Executes a compiled workflow graph with a checkpoint after every node.
///
/// A crash between nodes loses at most the node that was running. A
/// suspended run stores the node it stopped at; [`StateMachine::resume`]
/// re-runs exactly that node with the resume value in its context.
pub struct StateMachine<S: WorkflowState> {
    graph: Arc<CompiledGraph<S>>,
    checkpointer: Checkpointer,
    config: WorkflowConfig,
}

impl<S: WorkflowState> StateMachine<S> {
    pub fn new(graph: CompiledGraph<S>, checkpointer: Checkpointer, config: WorkflowConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            checkpointer,
            config,
        }
    }

    pub fn checkpointer(&self) -> &Checkpointer {
        &self.checkpointer
    }

    pub fn graph(&self) -> &CompiledGraph<S> {
        &self.graph
    }

    /// Starts a new run of `thread_id` from the entry node.
    pub async fn execute(&self, thread_id: &str, input: S) -> Result<Outcome<S>> {
        let run = WorkflowRun::new(thread_id, self.graph.entry(), StateBlob::encode(&input)?);
        let version = self.checkpointer.create(&run).await?;
        info!("Started workflow thread {} at {}", thread_id, run.current_node);

        self.drive(run, version, input, None)
            .instrument(info_span!("workflow_run", thread.id = %thread_id))
            .await
    }

    /// Re-enters a suspended run at its suspended node.
    ///
    /// The run is claimed by compare-and-swap before any node runs, so of
    /// two concurrent resumes exactly one proceeds; the other gets
    /// `ConcurrentModification` or `NotSuspended`.
    pub async fn resume(&self, thread_id: &str, value: Value) -> Result<Outcome<S>> {
        self.resume_checked(thread_id, None, value).await
    }

    /// Like [`StateMachine::resume`], but only while the run is still
    /// suspended under `token`. A run that has since moved on, or suspended
    /// again on something else, fails with `StaleSuspension` and is left
    /// untouched.
    pub async fn resume_if_token(&self, thread_id: &str, token: &str, value: Value) -> Result<Outcome<S>> {
        self.resume_checked(thread_id, Some(token), value).await
    }

    async fn resume_checked(&self, thread_id: &str, token: Option<&str>, value: Value) -> Result<Outcome<S>> {
        let (mut run, version) = self
            .checkpointer
            .load(thread_id)
            .await?
            .ok_or_else(|| WorkflowError::UnknownThread(thread_id.to_string()))?;
        if run.status != RunStatus::Suspended {
            return Err(WorkflowError::NotSuspended {
                thread_id: thread_id.to_string(),
                status: run.status,
            });
        }
        if let Some(expected) = token {
            let current = run.suspension.as_ref().map(|s| s.token.as_str());
            if current != Some(expected) {
                return Err(WorkflowError::StaleSuspension {
                    thread_id: thread_id.to_string(),
                    expected: expected.to_string(),
                    current: current.map(str::to_string),
                });
            }
        }

        let state: S = run.state_blob.decode()?;
        if let Some(suspension) = run.suspension.take() {
            run.current_node = suspension.node;
        }
        run.status = RunStatus::Running;
        let version = self.checkpointer.save(&mut run, version).await?;
        info!("Resuming workflow thread {} at {}", thread_id, run.current_node);

        self.drive(run, version, state, Some(value))
            .instrument(info_span!("workflow_run", thread.id = %thread_id))
            .await
    }

    /// Continues a run left `Running` by a crashed process, from its
    /// last checkpointed node.
    pub async fn recover(&self, thread_id: &str) -> Result<Outcome<S>> {
        let (run, version) = self
            .checkpointer
            .load(thread_id)
            .await?
            .ok_or_else(|| WorkflowError::UnknownThread(thread_id.to_string()))?;
        if run.status != RunStatus::Running {
            return Err(WorkflowError::NotRunning {
                thread_id: thread_id.to_string(),
                status: run.status,
            });
        }

        let state: S = run.state_blob.decode()?;
        info!("Recovering workflow thread {} at {}", thread_id, run.current_node);
        self.drive(run, version, state, None)
            .instrument(info_span!("workflow_run", thread.id = %thread_id))
            .await
    }

    pub async fn status(&self, thread_id: &str) -> Result<Option<RunStatus>> {
        Ok(self.checkpointer.load(thread_id).await?.map(|(run, _)| run.status))
    }

    pub async fn load_run(&self, thread_id: &str) -> Result<Option<WorkflowRun>> {
        Ok(self.checkpointer.load(thread_id).await?.map(|(run, _)| run))
    }

    async fn drive(
        &self,
        mut run: WorkflowRun,
        mut version: u64,
        mut state: S,
        mut resume_value: Option<Value>,
    ) -> Result<Outcome<S>> {
        // (node, state) pairs entered during this call, to spot loops that make no progress.
        let mut entered: HashSet<(String, u64)> = HashSet::new();
        // The transition budget is per call; `run.transitions` keeps the lifetime count.
        let first_transition = run.transitions;

        loop {
            let node_name = run.current_node.clone();

            if run.transitions - first_transition >= self.config.max_transitions {
                let err = WorkflowError::TransitionLimit {
                    thread_id: run.thread_id.clone(),
                    limit: self.config.max_transitions,
                };
                return self.fail(run, version, &state, node_name, err.to_string()).await;
            }

            let Some(node) = self.graph.node(&node_name) else {
                let err = WorkflowError::UnknownNode { node: node_name.clone() };
                return self.fail(run, version, &state, node_name, err.to_string()).await;
            };

            let ctx = NodeContext::new(
                run.thread_id.as_str(),
                node_name.as_str(),
                run.transitions,
                resume_value.take(),
            );
            debug!("Running node {} (transition {})", node_name, run.transitions);

            match node.run(&state, &ctx).await {
                Err(e) => {
                    return self.fail(run, version, &state, node_name, e.to_string()).await;
                }

                Ok(NodeOutput::Suspend(interrupt)) => {
                    let suspension = self.suspension_for(&node_name, interrupt);
                    run.state_blob = StateBlob::encode(&state)?;
                    run.status = RunStatus::Suspended;
                    run.suspension = Some(suspension.clone());
                    self.checkpointer.save(&mut run, version).await?;
                    info!(
                        "Workflow thread {} suspended at {} (token={})",
                        run.thread_id, node_name, suspension.token
                    );
                    return Ok(Outcome::Suspended(suspension));
                }

                Ok(NodeOutput::Update(delta)) => {
                    state.apply(delta);
                    run.transitions += 1;
                    run.state_blob = StateBlob::encode(&state)?;

                    let next = match self.graph.next(&node_name, &state) {
                        Ok(next) => next,
                        Err(e) => {
                            return self.fail(run, version, &state, node_name, e.to_string()).await;
                        }
                    };

                    if next == END {
                        run.status = RunStatus::Completed;
                        self.checkpointer.save(&mut run, version).await?;
                        info!(
                            "Workflow thread {} completed after {} transitions",
                            run.thread_id, run.transitions
                        );
                        return Ok(Outcome::Completed(state));
                    }

                    if !entered.insert((next.clone(), run.state_blob.fingerprint())) {
                        warn!(
                            "Workflow thread {} re-enters {} with unchanged state; the loop may not terminate",
                            run.thread_id, next
                        );
                    }
                    run.current_node = next;
                    version = self.checkpointer.save(&mut run, version).await?;
                }
            }
        }
    }

    async fn fail(
        &self,
        mut run: WorkflowRun,
        version: u64,
        state: &S,
        node: String,
        error: String,
    ) -> Result<Outcome<S>> {
        error!("Workflow thread {} failed at {}: {}", run.thread_id, node, error);
        run.status = RunStatus::Failed;
        run.error = Some(error.clone());
        run.current_node = node.clone();
        self.checkpointer.save(&mut run, version).await?;

        Ok(Outcome::Failed(FailureReport {
            node,
            error,
            summary: state.summary(),
        }))
    }

    fn suspension_for(&self, node: &str, interrupt: Interrupt) -> Suspension {
        let now = Utc::now();
        let token = match interrupt.job_id() {
            Some(job_id) => job_id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let expires_at = chrono::Duration::from_std(self.config.suspension_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl));

        Suspension {
            node: node.to_string(),
            token,
            interrupt,
            suspended_at: now,
            expires_at,
        }
    }
}

#[async_trait]
impl<S: WorkflowState> ResumeTarget for StateMachine<S> {
    async fn resume_run(&self, thread_id: &str, value: Value) -> Result<RunReport> {
        Ok(self.resume(thread_id, value).await?.report(thread_id))
    }

    async fn resume_if_token(&self, thread_id: &str, token: &str, value: Value) -> Result<RunReport> {
        Ok(StateMachine::resume_if_token(self, thread_id, token, value).await?.report(thread_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BoxError;
    use crate::storage::InMemoryStateStore;
    use crate::workflow::{node_fn, WorkflowGraph};
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Tally {
        visited: Vec<String>,
        answer: Option<String>,
    }

    enum TallyDelta {
        Visit(String),
        Answer(String),
    }

    impl WorkflowState for Tally {
        type Delta = TallyDelta;

        fn apply(&mut self, delta: TallyDelta) {
            match delta {
                TallyDelta::Visit(node) => self.visited.push(node),
                TallyDelta::Answer(answer) => self.answer = Some(answer),
            }
        }

        fn summary(&self) -> String {
            format!("visited {}", self.visited.join(", "))
        }
    }

    fn visit(name: &'static str) -> impl crate::workflow::Node<Tally> {
        node_fn(move |_: Tally, _: NodeContext| async move {
            Ok::<_, BoxError>(NodeOutput::Update(TallyDelta::Visit(name.to_string())))
        })
    }

    fn machine(graph: WorkflowGraph<Tally>, config: WorkflowConfig) -> StateMachine<Tally> {
        let checkpointer = Checkpointer::new(Arc::new(InMemoryStateStore::new()), config.retention);
        StateMachine::new(graph.compile().unwrap(), checkpointer, config)
    }

    fn ask_graph() -> WorkflowGraph<Tally> {
        WorkflowGraph::new()
            .add_node("start", visit("start"))
            .add_node(
                "ask",
                node_fn(|_: Tally, ctx: NodeContext| async move {
                    match ctx.resume_value() {
                        None => Ok::<_, BoxError>(NodeOutput::Suspend(Interrupt::Event {
                            payload: json!({"question": "color?"}),
                        })),
                        Some(v) => Ok(NodeOutput::Update(TallyDelta::Answer(
                            v["color"].as_str().unwrap_or_default().to_string(),
                        ))),
                    }
                }),
            )
            .add_node("finish", visit("finish"))
            .set_entry("start")
            .add_edge("start", "ask")
            .add_edge("ask", "finish")
            .add_edge("finish", END)
    }

    #[tokio::test]
    async fn test_suspend_then_resume_at_same_node() {
        let machine = machine(ask_graph(), WorkflowConfig::default());

        let outcome = machine.execute("t1", Tally::default()).await.unwrap();
        let suspension = outcome.suspension().cloned().unwrap();
        assert_eq!(suspension.node, "ask");
        assert!(suspension.expires_at.is_some());
        assert_eq!(machine.status("t1").await.unwrap(), Some(RunStatus::Suspended));

        match machine.resume("t1", json!({"color": "teal"})).await.unwrap() {
            Outcome::Completed(state) => {
                assert_eq!(state.visited, vec!["start", "finish"]);
                assert_eq!(state.answer.as_deref(), Some("teal"));
            }
            other => panic!("expected completion, got {:?}", other),
        }

        let run = machine.load_run("t1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.transitions, 3);
    }

    #[tokio::test]
    async fn test_resume_errors() {
        let machine = machine(ask_graph(), WorkflowConfig::default());
        assert!(matches!(
            machine.resume("ghost", json!({})).await,
            Err(WorkflowError::UnknownThread(_))
        ));

        machine.execute("t1", Tally::default()).await.unwrap();
        machine.resume("t1", json!({"color": "red"})).await.unwrap();
        assert!(matches!(
            machine.resume("t1", json!({"color": "red"})).await,
            Err(WorkflowError::NotSuspended { status: RunStatus::Completed, .. })
        ));
        assert!(matches!(
            machine.execute("t1", Tally::default()).await,
            Err(WorkflowError::ThreadExists(_))
        ));
    }

    #[tokio::test]
    async fn test_node_error_fails_with_summary() {
        let graph = WorkflowGraph::new()
            .add_node("start", visit("start"))
            .add_node(
                "explode",
                node_fn(|_: Tally, _: NodeContext| async move {
                    Err::<NodeOutput<TallyDelta>, BoxError>("tool crashed".into())
                }),
            )
            .set_entry("start")
            .add_edge("start", "explode")
            .add_edge("explode", END);
        let machine = machine(graph, WorkflowConfig::default());

        match machine.execute("t1", Tally::default()).await.unwrap() {
            Outcome::Failed(report) => {
                assert_eq!(report.node, "explode");
                assert_eq!(report.error, "tool crashed");
                assert_eq!(report.summary, "visited start");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        let run = machine.load_run("t1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("tool crashed"));
    }

    #[tokio::test]
    async fn test_runaway_cycle_hits_transition_limit() {
        let graph = WorkflowGraph::new()
            .add_node("spin", visit("spin"))
            .set_entry("spin")
            .add_conditional_edges("spin", |_: &Tally| "spin".to_string());
        let machine = machine(graph, WorkflowConfig::default().with_max_transitions(5));

        let outcome = machine.execute("t1", Tally::default()).await.unwrap();
        match outcome {
            Outcome::Failed(report) => assert!(report.error.contains("exceeded 5 transitions")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transition_budget_resets_on_each_resume() {
        let graph = WorkflowGraph::new()
            .add_node("step", visit("step"))
            .add_node(
                "wait",
                node_fn(|_: Tally, ctx: NodeContext| async move {
                    match ctx.resume_value() {
                        None => Ok::<_, BoxError>(NodeOutput::Suspend(Interrupt::Event { payload: json!({}) })),
                        Some(_) => Ok(NodeOutput::Update(TallyDelta::Visit("wait".to_string()))),
                    }
                }),
            )
            .set_entry("step")
            .add_edge("step", "wait")
            .add_conditional_edges("wait", |s: &Tally| {
                if s.visited.len() >= 12 {
                    END.to_string()
                } else {
                    "step".to_string()
                }
            });
        let machine = machine(graph, WorkflowConfig::default().with_max_transitions(3));

        let mut outcome = machine.execute("t1", Tally::default()).await.unwrap();
        for _ in 0..10 {
            if !matches!(outcome, Outcome::Suspended(_)) {
                break;
            }
            outcome = machine.resume("t1", json!({})).await.unwrap();
        }

        match outcome {
            Outcome::Completed(state) => assert_eq!(state.visited.len(), 12),
            other => panic!("expected completion, got {:?}", other),
        }
        let run = machine.load_run("t1").await.unwrap().unwrap();
        assert_eq!(run.transitions, 12);
    }

    #[tokio::test]
    async fn test_resume_if_token_rejects_other_suspension() {
        let machine = machine(ask_graph(), WorkflowConfig::default());
        let suspension = machine
            .execute("t1", Tally::default())
            .await
            .unwrap()
            .suspension()
            .cloned()
            .unwrap();

        match machine.resume_if_token("t1", "older-token", json!({"color": "red"})).await {
            Err(WorkflowError::StaleSuspension { expected, current, .. }) => {
                assert_eq!(expected, "older-token");
                assert_eq!(current.as_deref(), Some(suspension.token.as_str()));
            }
            other => panic!("expected stale suspension, got {:?}", other),
        }
        assert_eq!(machine.status("t1").await.unwrap(), Some(RunStatus::Suspended));

        let outcome = machine
            .resume_if_token("t1", &suspension.token, json!({"color": "red"}))
            .await
            .unwrap();
        assert_eq!(outcome.status(), RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_continues_from_checkpoint() {
        let store = Arc::new(InMemoryStateStore::new());
        let checkpointer = Checkpointer::new(store, Duration::from_secs(3600));

        // A run that crashed after checkpointing "start".
        let mut crashed = WorkflowRun::new(
            "t1",
            "finish",
            StateBlob::encode(&Tally {
                visited: vec!["start".into()],
                answer: None,
            })
            .unwrap(),
        );
        crashed.transitions = 1;
        checkpointer.create(&crashed).await.unwrap();

        let machine = StateMachine::new(ask_graph().compile().unwrap(), checkpointer, WorkflowConfig::default());
        match machine.recover("t1").await.unwrap() {
            Outcome::Completed(state) => assert_eq!(state.visited, vec!["start", "finish"]),
            other => panic!("expected completion, got {:?}", other),
        }
        assert!(matches!(
            machine.recover("t1").await,
            Err(WorkflowError::NotRunning { .. })
        ));
    }
}
