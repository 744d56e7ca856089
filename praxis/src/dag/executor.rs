use super::handler::{DelegationResult, HandlerRegistry, TaskContext, TaskOutput};
use super::plan::{Delegation, DelegationState, DelegationStatus, ExecutionPlan};
use crate::config::{serde_secs, ConfigError};
use crate::core::truncate_chars;
use crate::watcher::{report_quietly, ProgressSink};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

const RESULT_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    /// Upper bound on a single delegation, including time spent waiting
    /// for a concurrency slot.
    #[serde(with = "serde_secs")]
    pub delegation_timeout: Duration,
    /// Failures with confidence below this abort the remaining groups.
    pub critical_confidence: f64,
    /// Ignore grouping and run delegations one at a time.
    pub sequential: bool,
    /// Cap on concurrently running delegations within a group.
    pub max_concurrency: Option<usize>,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            delegation_timeout: Duration::from_secs(300),
            critical_confidence: 0.2,
            sequential: false,
            max_concurrency: None,
        }
    }
}

impl DagConfig {
    pub fn with_delegation_timeout(mut self, timeout: Duration) -> Self {
        self.delegation_timeout = timeout;
        self
    }

    pub fn with_critical_confidence(mut self, confidence: f64) -> Self {
        self.critical_confidence = confidence;
        self
    }

    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delegation_timeout.is_zero() {
            return Err(ConfigError::invalid("dag.delegation_timeout", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.critical_confidence) {
            return Err(ConfigError::invalid(
                "dag.critical_confidence",
                format!("must be within [0, 1], got {}", self.critical_confidence),
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::invalid("dag.max_concurrency", "must be nonzero"));
        }
        Ok(())
    }
}

/// Caller-side context for one plan execution.
#[derive(Clone)]
pub struct PlanContext {
    pub task_id: String,
    pub cancellation: CancellationToken,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl PlanContext {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            cancellation: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }
}

/// Outputs and final states of a plan execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Outputs of delegations that ran, in completion order.
    pub outputs: Vec<DelegationResult>,
    pub states: BTreeMap<String, DelegationState>,
    /// A critical failure stopped the remaining groups.
    pub aborted: bool,
    /// The plan was cancelled by the caller.
    pub cancelled: bool,
}

impl PlanResult {
    pub fn output(&self, delegation_id: &str) -> Option<&TaskOutput> {
        self.outputs
            .iter()
            .find(|r| r.delegation_id == delegation_id)
            .map(|r| &r.output)
    }

    pub fn status(&self, delegation_id: &str) -> Option<DelegationStatus> {
        self.states.get(delegation_id).map(|s| s.status)
    }

    /// Every planned delegation completed successfully.
    pub fn all_succeeded(&self) -> bool {
        !self.aborted
            && !self.cancelled
            && self
                .states
                .values()
                .all(|s| s.status == DelegationStatus::Completed)
    }
}

/// Runs execution plans against a set of task handlers.
///
/// Groups are barriers: no delegation of group N+1 starts before every
/// delegation of group N has returned. Members of a group are polled
/// concurrently on the calling task. Failures never escape as errors; a
/// handler error, an unknown target or a timeout each become a failed
/// output with confidence 0.0.
///
/// # Example
///
/// ```
/// use praxis::dag::{handler_fn, DagConfig, DagExecutor, Delegation, ExecutionPlan, HandlerRegistry, PlanContext, TaskOutput};
/// use serde_json::json;
///
/// # async fn example() {
/// let handlers = HandlerRegistry::new().with(
///     "search",
///     handler_fn(|input, _ctx| async move { Ok(TaskOutput::success(input)) }),
/// );
/// let executor = DagExecutor::new(handlers, DagConfig::default());
///
/// let plan = ExecutionPlan::sequential(vec![
///     Delegation::new("d1", "search", json!({"q": "tokio"})),
/// ]).unwrap();
/// let result = executor.execute_plan(&plan, &PlanContext::new("task-1")).await;
/// assert!(result.all_succeeded());
/// # }
/// ```
pub struct DagExecutor {
    handlers: HandlerRegistry,
    config: DagConfig,
}

impl DagExecutor {
    pub fn new(handlers: HandlerRegistry, config: DagConfig) -> Self {
        Self { handlers, config }
    }

    pub fn config(&self) -> &DagConfig {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub async fn execute_plan(&self, plan: &ExecutionPlan, ctx: &PlanContext) -> PlanResult {
        let mut result = PlanResult {
            states: plan
                .delegations()
                .iter()
                .map(|d| (d.id.clone(), DelegationState::pending(d.id.as_str())))
                .collect(),
            ..PlanResult::default()
        };

        let stages = self.stages(plan);
        info!(
            "Executing plan for task {} ({} delegations in {} stages)",
            ctx.task_id,
            plan.len(),
            stages.len()
        );

        for (index, stage) in stages.iter().enumerate() {
            if ctx.cancellation.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let span = info_span!("dag_group", task.id = %ctx.task_id, group = index, size = stage.len());
            let (outputs, cancelled) = self.run_stage(stage, ctx, &mut result).instrument(span).await;

            let critical = outputs
                .iter()
                .find(|r| r.output.is_critical_failure(self.config.critical_confidence))
                .map(|r| (r.delegation_id.clone(), r.output.confidence));
            result.outputs.extend(outputs);

            if cancelled {
                result.cancelled = true;
                break;
            }
            if let Some((id, confidence)) = critical {
                warn!(
                    "Critical failure in delegation {} (confidence={:.2}), aborting {} remaining stages",
                    id,
                    confidence,
                    stages.len() - index - 1
                );
                result.aborted = true;
                break;
            }
        }

        if result.cancelled {
            info!("Plan for task {} cancelled", ctx.task_id);
        }
        result
    }

    /// Groups in order, or one single-delegation stage per delegation when
    /// running sequentially.
    fn stages<'p>(&self, plan: &'p ExecutionPlan) -> Vec<Vec<&'p Delegation>> {
        if self.config.sequential || !plan.is_grouped() {
            return plan.delegations().iter().map(|d| vec![d]).collect();
        }
        plan.parallel_groups()
            .iter()
            .map(|group| group.iter().filter_map(|id| plan.delegation(id)).collect())
            .collect()
    }

    async fn run_stage(
        &self,
        stage: &[&Delegation],
        ctx: &PlanContext,
        result: &mut PlanResult,
    ) -> (Vec<DelegationResult>, bool) {
        for delegation in stage {
            set_status(result, &delegation.id, DelegationStatus::Running);
        }

        let semaphore = self.config.max_concurrency.map(Semaphore::new);
        let mut in_flight: FuturesUnordered<_> = stage
            .iter()
            .map(|delegation| self.run_delegation(delegation, ctx, semaphore.as_ref()))
            .collect();

        let mut outputs = Vec::with_capacity(stage.len());
        loop {
            tokio::select! {
                biased;

                _ = ctx.cancellation.cancelled() => {
                    // Dropping the in-flight futures cancels them; they never started from our point of view.
                    for state in result.states.values_mut() {
                        if state.status == DelegationStatus::Running {
                            state.status = DelegationStatus::Pending;
                        }
                    }
                    return (outputs, true);
                }

                next = in_flight.next() => {
                    let Some(done) = next else { break };
                    record(result, &done);
                    if let Some(sink) = &ctx.progress {
                        report_quietly(sink.as_ref(), &ctx.task_id, &progress_message(&done)).await;
                    }
                    outputs.push(done);
                }
            }
        }
        (outputs, false)
    }

    async fn run_delegation(
        &self,
        delegation: &Delegation,
        ctx: &PlanContext,
        semaphore: Option<&Semaphore>,
    ) -> DelegationResult {
        let started = Instant::now();
        let task_ctx = TaskContext {
            task_id: ctx.task_id.clone(),
            delegation_id: delegation.id.clone(),
            cancellation: ctx.cancellation.child_token(),
        };

        let attempt = async {
            let _permit = match semaphore {
                Some(semaphore) => semaphore.acquire().await.ok(),
                None => None,
            };
            match self.handlers.get(&delegation.target) {
                None => TaskOutput::failure(format!(
                    "no handler registered for target '{}'",
                    delegation.target
                )),
                Some(handler) => match handler.execute(&delegation.input, &task_ctx).await {
                    Ok(output) => output,
                    Err(e) => {
                        warn!("Delegation {} failed: {}", delegation.id, e);
                        TaskOutput::failure(e.to_string())
                    }
                },
            }
        };

        let output = match tokio::time::timeout(self.config.delegation_timeout, attempt).await {
            Ok(output) => output,
            Err(_) => {
                warn!(
                    "Delegation {} timed out after {:?}",
                    delegation.id, self.config.delegation_timeout
                );
                TaskOutput::failure(format!(
                    "timed out after {:?}",
                    self.config.delegation_timeout
                ))
            }
        };

        let elapsed = started.elapsed();
        debug!(
            "Delegation {} finished (success={}, confidence={:.2}, elapsed={:?})",
            delegation.id, output.success, output.confidence, elapsed
        );
        DelegationResult {
            delegation_id: delegation.id.clone(),
            output,
            elapsed,
        }
    }
}

fn set_status(result: &mut PlanResult, id: &str, status: DelegationStatus) {
    if let Some(state) = result.states.get_mut(id) {
        state.status = status;
    }
}

fn record(result: &mut PlanResult, done: &DelegationResult) {
    if let Some(state) = result.states.get_mut(&done.delegation_id) {
        state.status = if done.output.success {
            DelegationStatus::Completed
        } else {
            DelegationStatus::Failed
        };
        state.result_summary = Some(summarize(&done.output.result));
        state.child_delegation_ids = done.output.child_delegation_ids.clone();
    }
}

fn summarize(result: &Value) -> String {
    match result {
        Value::String(text) => truncate_chars(text, RESULT_SUMMARY_CHARS),
        other => truncate_chars(&other.to_string(), RESULT_SUMMARY_CHARS),
    }
}

fn progress_message(done: &DelegationResult) -> String {
    format!(
        "Delegation {} {} in {:.1}s",
        done.delegation_id,
        if done.output.success { "completed" } else { "failed" },
        done.elapsed.as_secs_f64()
    )
}
