use crate::core::BoxError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a task handler returns for one delegation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub success: bool,
    pub result: Value,
    /// Handler's confidence in `result`, in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub changed_artifacts: Vec<String>,
    /// Follow-up delegations the handler spawned.
    #[serde(default)]
    pub child_delegation_ids: Vec<String>,
}

impl TaskOutput {
    pub fn success(result: impl Into<Value>) -> Self {
        Self {
            success: true,
            result: result.into(),
            confidence: 1.0,
            changed_artifacts: Vec::new(),
            child_delegation_ids: Vec::new(),
        }
    }

    /// A failure with confidence 0.0, which is always critical.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::String(reason.into()),
            confidence: 0.0,
            changed_artifacts: Vec::new(),
            child_delegation_ids: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_artifacts(mut self, artifacts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.changed_artifacts = artifacts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_children(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.child_delegation_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// A confident failure: later groups are not worth running.
    /// A non-finite confidence counts as 0.0.
    pub fn is_critical_failure(&self, threshold: f64) -> bool {
        let confidence = if self.confidence.is_finite() { self.confidence } else { 0.0 };
        !self.success && confidence < threshold
    }
}

/// Output of one delegation together with its identity and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationResult {
    pub delegation_id: String,
    pub output: TaskOutput,
    pub elapsed: Duration,
}

/// Per-delegation context handed to a [`TaskHandler`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub delegation_id: String,
    /// Cancelled when the plan is cancelled.
    pub cancellation: CancellationToken,
}

/// A pluggable executor for one delegation target.
///
/// Handlers are opaque to the executor: any error is turned into a failed
/// [`TaskOutput`] with confidence 0.0.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, input: &Value, ctx: &TaskContext) -> Result<TaskOutput, BoxError>;
}

/// Adapter that turns an async closure into a [`TaskHandler`].
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, BoxError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Value, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, BoxError>> + Send + 'static,
{
    async fn execute(&self, input: &Value, ctx: &TaskContext) -> Result<TaskOutput, BoxError> {
        (self.f)(input.clone(), ctx.clone()).await
    }
}

/// Maps delegation targets to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: impl Into<String>, handler: impl TaskHandler + 'static) {
        self.handlers.insert(target.into(), Arc::new(handler));
    }

    pub fn with(mut self, target: impl Into<String>, handler: impl TaskHandler + 'static) -> Self {
        self.register(target, handler);
        self
    }

    pub fn get(&self, target: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(target).cloned()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.handlers.contains_key(target)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut targets: Vec<&str> = self.targets().collect();
        targets.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("targets", &targets)
            .finish()
    }
}
