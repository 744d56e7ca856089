use super::WorkflowState;
use crate::approval::ApprovalRequest;
use crate::core::{BoxError, CoreError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;

/// What a suspended node is waiting for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "wait", rename_all = "snake_case")]
pub enum Interrupt {
    /// A dispatched external job. The job watcher resumes the run with a
    /// [`JobResult`](crate::watcher::JobResult) once the job is terminal.
    ExternalJob {
        job_id: String,
        #[serde(default)]
        metadata: Value,
    },
    /// A human decision; resumed with an
    /// [`ApprovalResponse`](crate::approval::ApprovalResponse).
    Approval { request: ApprovalRequest },
    /// Any other external event.
    Event { payload: Value },
}

impl Interrupt {
    pub fn external_job(job_id: impl Into<String>, metadata: Value) -> Self {
        Self::ExternalJob {
            job_id: job_id.into(),
            metadata,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::ExternalJob { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

/// Result of running one node.
#[derive(Debug)]
pub enum NodeOutput<D> {
    /// Merge this delta into the state and follow the node's edge.
    Update(D),
    /// Persist and stop here; the node is re-entered on resume.
    Suspend(Interrupt),
}

/// Where a node runs, and the value it was resumed with, if any.
#[derive(Debug, Clone)]
pub struct NodeContext {
    thread_id: String,
    node: String,
    transition: u64,
    resume_value: Option<serde_json::Value>,
}

impl NodeContext {
    pub fn new(
        thread_id: impl Into<String>,
        node: impl Into<String>,
        transition: u64,
        resume_value: Option<Value>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            node: node.into(),
            transition,
            resume_value,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Number of nodes the run has completed before this one.
    pub fn transition(&self) -> u64 {
        self.transition
    }

    /// The value passed to `resume`, present only on the first node run
    /// after a resume.
    pub fn resume_value(&self) -> Option<&Value> {
        self.resume_value.as_ref()
    }

    pub fn is_resumed(&self) -> bool {
        self.resume_value.is_some()
    }

    pub fn resume_as<T: DeserializeOwned>(&self) -> Result<Option<T>, CoreError> {
        self.resume_value
            .as_ref()
            .map(|value| T::deserialize(value).map_err(CoreError::Deserialization))
            .transpose()
    }
}

/// One step of a workflow.
///
/// Nodes must be re-entrant: after a crash or a suspension the node runs
/// again from the last persisted state.
#[async_trait]
pub trait Node<S: WorkflowState>: Send + Sync {
    async fn run(&self, state: &S, ctx: &NodeContext) -> Result<NodeOutput<S::Delta>, BoxError>;
}

/// Adapter that turns an async closure into a [`Node`].
///
/// The closure receives owned copies of the state and context.
pub struct FnNode<S, F> {
    f: F,
    _state: PhantomData<fn(S)>,
}

pub fn node_fn<S, F, Fut>(f: F) -> FnNode<S, F>
where
    S: WorkflowState,
    F: Fn(S, NodeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeOutput<S::Delta>, BoxError>> + Send + 'static,
{
    FnNode {
        f,
        _state: PhantomData,
    }
}

#[async_trait]
impl<S, F, Fut> Node<S> for FnNode<S, F>
where
    S: WorkflowState,
    F: Fn(S, NodeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeOutput<S::Delta>, BoxError>> + Send + 'static,
{
    async fn run(&self, state: &S, ctx: &NodeContext) -> Result<NodeOutput<S::Delta>, BoxError> {
        (self.f)(state.clone(), ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalRequest, GIT_PUSH};
    use serde_json::json;

    #[test]
    fn test_interrupt_wire_format() {
        let job = Interrupt::external_job("job-42", json!({"gpu": "a100"}));
        assert_eq!(
            serde_json::to_value(&job).unwrap(),
            json!({"wait": "external_job", "job_id": "job-42", "metadata": {"gpu": "a100"}})
        );
        assert_eq!(job.job_id(), Some("job-42"));

        let approval = Interrupt::Approval {
            request: ApprovalRequest::new(GIT_PUSH, "push", "Push main"),
        };
        let value = serde_json::to_value(&approval).unwrap();
        assert_eq!(value["wait"], "approval");
        assert_eq!(value["request"]["type"], "git_push");
        assert_eq!(serde_json::from_value::<Interrupt>(value).unwrap(), approval);
        assert_eq!(approval.job_id(), None);
    }

    #[test]
    fn test_resume_as() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Answer {
            ok: bool,
        }

        let fresh = NodeContext::new("t", "n", 0, None);
        assert_eq!(fresh.resume_as::<Answer>().unwrap(), None);
        assert!(!fresh.is_resumed());

        let resumed = NodeContext::new("t", "n", 3, Some(json!({"ok": true})));
        assert_eq!(resumed.resume_as::<Answer>().unwrap(), Some(Answer { ok: true }));
        assert!(resumed.resume_as::<u32>().is_err());
        assert_eq!(resumed.transition(), 3);
    }
}
