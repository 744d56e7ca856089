//! Praxis: durable execution core for multi-agent task orchestration
//!
//! `praxis` (πρᾶξις, Greek for "action" or "doing") runs the bookkeeping
//! underneath an agent orchestrator: who is allowed to execute, what a run
//! looked like when it paused, which delegated sub-tasks run together, and
//! how a run picks up again when the slow external job it waited on finishes.
//!
//! # Features
//!
//! - **Checkpointed workflows**: a node graph whose state is persisted after every transition
//! - **Suspend and resume**: nodes pause for approvals or external jobs and resume with a value
//! - **Fleet-wide execution lock**: a heartbeat-refreshed lock with stale-holder takeover
//! - **DAG delegation**: ordered parallel groups with timeouts, cancellation and critical-failure abort
//! - **Job watcher**: polls external jobs and resumes exactly once per suspension
//! - **Tiered escalation**: deterministic output checks and approval-gated model tiers
//! - **Context and session caching**: summary/detail fragments and a write-buffered cache
//!
//! # Quick Start
//!
//! ```ignore
//! use praxis::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
//!     let graph = WorkflowGraph::<Ticket>::new()
//!         .add_node("triage", node_fn(|s: &Ticket, _| { /* ... */ }))
//!         .set_entry("triage")
//!         .add_edge("triage", END);
//!
//!     let orchestrator = Orchestrator::builder(store, graph, runner).build()?;
//!     orchestrator.startup().await?;
//!     let watcher = orchestrator.start_watcher();
//!
//!     orchestrator.run("ticket-7", Ticket::default()).await?;
//!     watcher.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`storage`]: the CAS/TTL/range-scan store every component persists through
//! - [`core`]: errors, serialization helpers and retry policy
//! - [`graph`]: dependency graphs used to level delegation plans
//! - [`workflow`]: node graph, state machine and checkpointer
//! - [`lock`]: fleet-wide execution lock
//! - [`dag`]: delegation plans and their executor
//! - [`watcher`]: external job reconciliation
//! - [`escalation`], [`approval`]: tier escalation and human approval gates
//! - [`context`], [`cache`]: context fragments and the session cache
//! - [`config`], [`runtime`]: configuration and the composition root

pub mod approval;
pub mod cache;
pub mod config;
pub mod context;
pub mod core;
pub mod dag;
pub mod escalation;
pub mod graph;
pub mod lock;
pub mod runtime;
pub mod storage;
pub mod watcher;
pub mod workflow;

pub use approval::{approval_gate, ApprovalRequest, ApprovalResponse, GateDecision};

pub use cache::{CacheConfig, SessionCache};

pub use config::{ConfigError, OrchestratorConfig};

pub use context::{ContextConfig, ContextError, ContextFragment, ContextScope, ContextStore};

pub use core::{BoxError, CoreError, RetryPolicy, Transient};

pub use dag::{
    handler_fn, DagConfig, DagExecutor, Delegation, DelegationStatus, ExecutionPlan,
    HandlerRegistry, PlanContext, PlanResult, TaskContext, TaskHandler, TaskOutput,
};

pub use escalation::{EscalationController, EscalationDecision, Tier};

pub use graph::{DependencyGraph, GraphError, NodeId};

pub use lock::{ExecutionLock, LockConfig};

pub use runtime::{GuardedRunner, Orchestrator, RunAttempt, RuntimeError, StartupReport};

pub use storage::{InMemoryStateStore, StateStore, StorageError};

#[cfg(feature = "sqlite")]
pub use storage::SqliteStateStore;

#[cfg(feature = "redis")]
pub use storage::RedisStateStore;

pub use watcher::{JobResult, JobRunner, JobSpec, JobStatus, JobWatcher, ProgressSink, WatcherConfig};

pub use workflow::{
    node_fn, Interrupt, Node, NodeContext, NodeOutput, Outcome, RunStatus, StateMachine,
    WorkflowConfig, WorkflowError, WorkflowGraph, WorkflowState, END,
};

// Re-export dependencies used in public API
pub use async_trait::async_trait;
pub use serde;
pub use serde_json;
pub use tokio;

/// Prelude module for convenient glob imports
///
/// # Example
///
/// ```
/// use praxis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::approval::{approval_gate, ApprovalRequest, ApprovalResponse, GateDecision};
    pub use crate::core::{BoxError, CoreError, RetryPolicy};
    pub use crate::dag::{
        handler_fn, DagExecutor, Delegation, ExecutionPlan, HandlerRegistry, PlanContext,
        TaskContext, TaskOutput,
    };
    pub use crate::runtime::{Orchestrator, RunAttempt};
    pub use crate::storage::{InMemoryStateStore, StateStore};
    pub use crate::watcher::{JobResult, JobRunner, JobSpec, JobStatus};
    pub use crate::workflow::{
        node_fn, Interrupt, Node, NodeContext, NodeOutput, Outcome, WorkflowGraph, WorkflowState,
        END,
    };

    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
    pub use std::sync::Arc;
}
