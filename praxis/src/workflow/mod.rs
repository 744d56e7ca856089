//! Checkpointed workflow state machine.
//!
//! A workflow is a graph of named [`Node`]s over a typed [`WorkflowState`].
//! After every node the merged state is written through the
//! [`Checkpointer`] before the next node starts. A node may instead
//! suspend with an [`Interrupt`]; the run is persisted with the suspended
//! node's name, and [`StateMachine::resume`] later re-runs that node with
//! the resume value in its [`NodeContext`]. Because the continuation is an
//! explicit record rather than a captured stack, any process can resume
//! any run.

mod checkpoint;
mod error;
mod graph;
mod machine;
mod node;
mod state;

pub use checkpoint::{Checkpointer, RunStatus, Suspension, WorkflowRun, RUNS_COLLECTION};
pub use error::{Result, WorkflowError};
pub use graph::{CompiledGraph, WorkflowGraph, END};
pub use machine::{FailureReport, Outcome, ResumeTarget, RunReport, StateMachine};
pub use node::{node_fn, FnNode, Interrupt, Node, NodeContext, NodeOutput};
pub use state::{StateBlob, WorkflowState};

use crate::config::serde_secs;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Node executions allowed per execute, resume or recover call.
    pub max_transitions: u64,
    /// How long run records are kept.
    #[serde(with = "serde_secs")]
    pub retention: Duration,
    /// How long a suspension stays valid before the job watcher gives up on it.
    #[serde(with = "serde_secs")]
    pub suspension_ttl: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_transitions: 100,
            retention: Duration::from_secs(30 * 24 * 3600),
            suspension_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

impl WorkflowConfig {
    pub fn with_max_transitions(mut self, max: u64) -> Self {
        self.max_transitions = max;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_suspension_ttl(mut self, ttl: Duration) -> Self {
        self.suspension_ttl = ttl;
        self
    }
}
