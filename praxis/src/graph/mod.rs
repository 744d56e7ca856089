//! Dependency graphs over named nodes.
//!
//! Used to turn an explicit "x depends on y" edge list into the ordered
//! parallel groups an [`ExecutionPlan`](crate::dag::ExecutionPlan) executes:
//!
//! - explicit dependency declaration between nodes
//! - cycle detection at insertion time
//! - deterministic topological ordering (Kahn's algorithm)
//! - partition into dependency levels, each of which may run concurrently

mod dependency_graph;
mod error;
mod node_id;

pub use dependency_graph::DependencyGraph;
pub use error::{GraphError, GraphResult};
pub use node_id::NodeId;
