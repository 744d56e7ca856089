//! Error types for graph operations

use super::NodeId;
use thiserror::Error;

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors that can occur while building or ordering a dependency graph
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum GraphError {
    /// A cycle was detected in the dependency graph
    #[error("cycle detected in dependency graph: {path}")]
    CycleDetected { path: String },

    #[error("node not found: {node}")]
    NodeNotFound { node: NodeId },

    /// A dependency references a node that was never added
    #[error("dependency '{dependency}' of '{node}' does not exist")]
    DependencyNotFound { node: NodeId, dependency: NodeId },

    #[error("duplicate node: {node}")]
    DuplicateNode { node: NodeId },

    #[error("node '{node}' cannot depend on itself")]
    SelfDependency { node: NodeId },

    #[error("graph is empty")]
    EmptyGraph,
}

impl GraphError {
    pub fn cycle(path: impl Into<String>) -> Self {
        Self::CycleDetected { path: path.into() }
    }

    pub fn node_not_found(node: NodeId) -> Self {
        Self::NodeNotFound { node }
    }

    pub fn dependency_not_found(node: NodeId, dependency: NodeId) -> Self {
        Self::DependencyNotFound { node, dependency }
    }

    pub fn duplicate_node(node: NodeId) -> Self {
        Self::DuplicateNode { node }
    }

    pub fn self_dependency(node: NodeId) -> Self {
        Self::SelfDependency { node }
    }
}
