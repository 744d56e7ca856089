use super::RunStatus;
use crate::core::{CoreError, Transient};
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkflowError {
    #[error("unknown workflow thread: {0}")]
    UnknownThread(String),

    #[error("workflow thread already exists: {0}")]
    ThreadExists(String),

    #[error("workflow thread {thread_id} is not suspended (status: {status})")]
    NotSuspended { thread_id: String, status: RunStatus },

    #[error("workflow thread {thread_id} is not running (status: {status})")]
    NotRunning { thread_id: String, status: RunStatus },

    /// The run is suspended, but no longer under the token the caller held.
    #[error("workflow thread {thread_id} is not suspended under token {expected} (current: {current:?})")]
    StaleSuspension {
        thread_id: String,
        expected: String,
        current: Option<String>,
    },

    #[error("unknown node: {node}")]
    UnknownNode { node: String },

    #[error("invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("workflow thread {thread_id} was modified concurrently")]
    ConcurrentModification { thread_id: String },

    #[error("workflow thread {thread_id} exceeded {limit} transitions")]
    TransitionLimit { thread_id: String, limit: u64 },

    /// Another process holds the execution lock.
    #[error("execution lock is held elsewhere")]
    Busy,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl Transient for WorkflowError {
    fn is_transient(&self) -> bool {
        match self {
            WorkflowError::Busy | WorkflowError::ConcurrentModification { .. } => true,
            WorkflowError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
