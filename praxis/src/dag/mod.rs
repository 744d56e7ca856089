//! DAG executor for delegated sub-tasks.
//!
//! A plan is a list of [`Delegation`]s plus ordered parallel groups.
//! [`DagExecutor::execute_plan`] runs group after group, every member of a
//! group concurrently, and stops early when a delegation fails with low
//! confidence (a "critical" failure). Partial results are always returned.

mod executor;
mod handler;
mod plan;

pub use executor::{DagConfig, DagExecutor, PlanContext, PlanResult};
pub use handler::{
    handler_fn, DelegationResult, FnHandler, HandlerRegistry, TaskContext, TaskHandler, TaskOutput,
};
pub use plan::{Delegation, DelegationState, DelegationStatus, ExecutionPlan, PlanError};
