//! Composition root.
//!
//! [`Orchestrator`] owns one instance of every component and wires them
//! together. There are no process globals: build one orchestrator at
//! startup and pass it (or the components it exposes) to whatever needs
//! them. Tests rebuild it or call [`Orchestrator::reset_for_tests`].

use crate::cache::SessionCache;
use crate::config::{ConfigError, OrchestratorConfig};
use crate::context::ContextStore;
use crate::core::{retry_transient, RetryPolicy};
use crate::dag::{DagExecutor, HandlerRegistry};
use crate::lock::ExecutionLock;
use crate::storage::{StateStore, StorageError, TtlSweeper, TtlSweeperHandle};
use crate::watcher::{JobRunner, JobWatcher, ProgressSink, RecoveryReport, TracingProgressSink, WatcherHandle};
use crate::workflow::{
    Checkpointer, Outcome, ResumeTarget, RunReport, RunStatus, StateMachine, WorkflowError, WorkflowGraph,
    WorkflowState,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Retry for releasing the lock after a run.
const RELEASE_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 4,
    initial_delay: Duration::from_millis(50),
    max_delay: Duration::from_secs(1),
    backoff_multiplier: 2.0,
};

/// Result of a lock-guarded run or resume.
#[derive(Debug)]
pub enum RunAttempt<S> {
    /// Another run holds the execution lock; nothing was executed.
    Busy,
    Finished(Outcome<S>),
}

impl<S> RunAttempt<S> {
    pub fn is_busy(&self) -> bool {
        matches!(self, RunAttempt::Busy)
    }

    pub fn outcome(&self) -> Option<&Outcome<S>> {
        match self {
            RunAttempt::Finished(outcome) => Some(outcome),
            RunAttempt::Busy => None,
        }
    }

    pub fn into_outcome(self) -> Option<Outcome<S>> {
        match self {
            RunAttempt::Finished(outcome) => Some(outcome),
            RunAttempt::Busy => None,
        }
    }
}

/// What [`Orchestrator::startup`] repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub stale_lock_cleared: bool,
    pub recovery: RecoveryReport,
    /// Runs left `Running` by a crashed process. Continue them with [`Orchestrator::recover`].
    pub interrupted: Vec<String>,
}

/// Resumes runs under the execution lock. The job watcher resumes through this.
pub struct GuardedRunner<S: WorkflowState> {
    lock: Arc<ExecutionLock>,
    machine: Arc<StateMachine<S>>,
}

impl<S: WorkflowState> GuardedRunner<S> {
    pub fn new(lock: Arc<ExecutionLock>, machine: Arc<StateMachine<S>>) -> Self {
        Self { lock, machine }
    }

    /// Runs `work` while holding the lock. `Ok(None)` when the lock is busy.
    async fn guarded<T, F, Fut>(&self, thread_id: &str, work: F) -> std::result::Result<Option<T>, WorkflowError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, WorkflowError>>,
    {
        if !self.lock.acquire(thread_id).await? {
            info!("Execution lock busy, not running thread {}", thread_id);
            return Ok(None);
        }

        let result = work().await;
        if let Err(e) = retry_transient(RELEASE_RETRY, |_| self.lock.release()).await {
            warn!("Failed to release execution lock after thread {}: {}", thread_id, e);
        }
        result.map(Some)
    }
}

#[async_trait]
impl<S: WorkflowState> ResumeTarget for GuardedRunner<S> {
    async fn resume_run(&self, thread_id: &str, value: Value) -> std::result::Result<RunReport, WorkflowError> {
        let machine = Arc::clone(&self.machine);
        match self
            .guarded(thread_id, || async move { machine.resume(thread_id, value).await })
            .await?
        {
            Some(outcome) => Ok(outcome.report(thread_id)),
            None => Err(WorkflowError::Busy),
        }
    }

    async fn resume_if_token(
        &self,
        thread_id: &str,
        token: &str,
        value: Value,
    ) -> std::result::Result<RunReport, WorkflowError> {
        let machine = Arc::clone(&self.machine);
        match self
            .guarded(thread_id, || async move { machine.resume_if_token(thread_id, token, value).await })
            .await?
        {
            Some(outcome) => Ok(outcome.report(thread_id)),
            None => Err(WorkflowError::Busy),
        }
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder<S: WorkflowState> {
    store: Arc<dyn StateStore>,
    graph: WorkflowGraph<S>,
    runner: Arc<dyn JobRunner>,
    config: OrchestratorConfig,
    progress: Option<Arc<dyn ProgressSink>>,
    dag: Option<Arc<DagExecutor>>,
}

impl<S: WorkflowState> OrchestratorBuilder<S> {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Shares a DAG executor that graph nodes already hold.
    pub fn dag(mut self, dag: Arc<DagExecutor>) -> Self {
        self.dag = Some(dag);
        self
    }

    pub fn build(self) -> Result<Orchestrator<S>> {
        self.config.validate()?;
        let config = self.config;

        let progress = self
            .progress
            .unwrap_or_else(|| Arc::new(TracingProgressSink) as Arc<dyn ProgressSink>);
        let dag = self
            .dag
            .unwrap_or_else(|| Arc::new(DagExecutor::new(HandlerRegistry::new(), config.dag.clone())));

        let checkpointer = Checkpointer::new(Arc::clone(&self.store), config.workflow.retention);
        let machine = Arc::new(StateMachine::new(
            self.graph.compile()?,
            checkpointer,
            config.workflow.clone(),
        ));
        let lock = Arc::new(ExecutionLock::new(Arc::clone(&self.store), config.lock.clone()));
        let guarded = Arc::new(GuardedRunner::new(Arc::clone(&lock), Arc::clone(&machine)));
        let watcher = Arc::new(
            JobWatcher::new(Arc::clone(&self.runner), guarded)
                .with_progress(Arc::clone(&progress))
                .with_config(config.watcher.clone()),
        );
        let context = Arc::new(ContextStore::with_config(
            Arc::clone(&self.store),
            config.context.clone(),
        ));

        info!("Orchestrator built (lock holder={})", lock.holder_id());
        Ok(Orchestrator {
            store: self.store,
            runner: self.runner,
            config,
            lock,
            machine,
            watcher,
            context,
            dag,
            progress,
        })
    }
}

/// One process's execution core.
///
/// # Lifecycle
/// 1. Build: `Orchestrator::builder(store, graph, runner).config(..).build()?`
/// 2. Startup: `startup().await?` clears a stale lock and rebuilds job watches
/// 3. Watch: `start_watcher()` returns a handle
/// 4. Run: `run(thread_id, input)` / `resume(thread_id, value)`
/// 5. Shutdown: `handle.shutdown().await`
pub struct Orchestrator<S: WorkflowState> {
    store: Arc<dyn StateStore>,
    runner: Arc<dyn JobRunner>,
    config: OrchestratorConfig,
    lock: Arc<ExecutionLock>,
    machine: Arc<StateMachine<S>>,
    watcher: Arc<JobWatcher>,
    context: Arc<ContextStore>,
    dag: Arc<DagExecutor>,
    progress: Arc<dyn ProgressSink>,
}

impl<S: WorkflowState> Orchestrator<S> {
    pub fn builder(
        store: Arc<dyn StateStore>,
        graph: WorkflowGraph<S>,
        runner: Arc<dyn JobRunner>,
    ) -> OrchestratorBuilder<S> {
        OrchestratorBuilder {
            store,
            graph,
            runner,
            config: OrchestratorConfig::default(),
            progress: None,
            dag: None,
        }
    }

    /// Clears a stale lock left by a crashed process, then re-registers
    /// job watches from suspended runs.
    pub async fn startup(&self) -> Result<StartupReport> {
        let stale_lock_cleared = self.lock.sweep_stale().await?;
        let recovery = self.watcher.recover(self.machine.checkpointer()).await?;
        let interrupted: Vec<String> = self
            .machine
            .checkpointer()
            .list_by_status(RunStatus::Running)
            .await?
            .into_iter()
            .map(|run| run.thread_id)
            .collect();
        if !interrupted.is_empty() {
            warn!("{} runs were interrupted mid-execution: {:?}", interrupted.len(), interrupted);
        }
        Ok(StartupReport {
            stale_lock_cleared,
            recovery,
            interrupted,
        })
    }

    /// Starts a new run under the execution lock.
    ///
    /// Returns [`RunAttempt::Busy`] at once if another run holds the lock.
    /// A run that suspends on an external job is registered with the watcher.
    pub async fn run(&self, thread_id: &str, input: S) -> Result<RunAttempt<S>> {
        let machine = Arc::clone(&self.machine);
        let outcome = self
            .guarded_runner()
            .guarded(thread_id, || async move { machine.execute(thread_id, input).await })
            .await?;
        Ok(self.finish(thread_id, outcome))
    }

    /// Resumes a suspended run under the execution lock.
    pub async fn resume(&self, thread_id: &str, value: Value) -> Result<RunAttempt<S>> {
        let machine = Arc::clone(&self.machine);
        let outcome = self
            .guarded_runner()
            .guarded(thread_id, || async move { machine.resume(thread_id, value).await })
            .await?;
        Ok(self.finish(thread_id, outcome))
    }

    /// Continues a run left `Running` by a crash, under the execution lock.
    pub async fn recover(&self, thread_id: &str) -> Result<RunAttempt<S>> {
        let machine = Arc::clone(&self.machine);
        let outcome = self
            .guarded_runner()
            .guarded(thread_id, || async move { machine.recover(thread_id).await })
            .await?;
        Ok(self.finish(thread_id, outcome))
    }

    pub fn start_watcher(&self) -> WatcherHandle {
        self.watcher.start()
    }

    /// Starts a TTL sweep over the store. Only needed for backends without native expiry.
    pub fn start_sweeper(&self, interval: Duration) -> TtlSweeperHandle {
        TtlSweeper::new(Arc::clone(&self.store))
            .with_interval(interval)
            .start()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn runner(&self) -> &Arc<dyn JobRunner> {
        &self.runner
    }

    pub fn progress(&self) -> &Arc<dyn ProgressSink> {
        &self.progress
    }

    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub fn lock(&self) -> &Arc<ExecutionLock> {
        &self.lock
    }

    pub fn machine(&self) -> &Arc<StateMachine<S>> {
        &self.machine
    }

    pub fn watcher(&self) -> &Arc<JobWatcher> {
        &self.watcher
    }

    pub fn dag(&self) -> &Arc<DagExecutor> {
        &self.dag
    }

    /// A session cache over `collection`, sized by the configured cache settings.
    pub fn session_cache<V>(&self, collection: impl Into<String>) -> Arc<SessionCache<V>>
    where
        V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        Arc::new(SessionCache::new(
            Arc::clone(&self.store),
            collection,
            self.config.cache.clone(),
        ))
    }

    /// Wipes the store and the watch registry.
    pub async fn reset_for_tests(&self) -> Result<()> {
        self.watcher.clear();
        self.store.reset().await?;
        Ok(())
    }

    fn guarded_runner(&self) -> GuardedRunner<S> {
        GuardedRunner::new(Arc::clone(&self.lock), Arc::clone(&self.machine))
    }

    fn finish(&self, thread_id: &str, outcome: Option<Outcome<S>>) -> RunAttempt<S> {
        match outcome {
            None => RunAttempt::Busy,
            Some(outcome) => {
                if let Some(suspension) = outcome.suspension() {
                    self.watcher.register_suspension(thread_id, suspension);
                }
                RunAttempt::Finished(outcome)
            }
        }
    }
}
