use crate::graph::{DependencyGraph, GraphError, NodeId};
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// One unit of delegated work. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: String,
    /// Name of the handler that executes this delegation.
    pub target: String,
    #[serde(default)]
    pub input: Value,
}

impl Delegation {
    pub fn new(id: impl Into<String>, target: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            input,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DelegationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Execution tracking for one delegation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationState {
    pub id: String,
    pub status: DelegationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub child_delegation_ids: Vec<String>,
}

impl DelegationState {
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: DelegationStatus::Pending,
            result_summary: None,
            child_delegation_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum PlanError {
    #[error("duplicate delegation id: {0}")]
    DuplicateDelegation(String),

    #[error("group {group} references unknown delegation: {id}")]
    UnknownDelegation { group: usize, id: String },

    #[error("delegation {0} appears in more than one group")]
    DuplicateGroupMember(String),

    #[error("delegation {0} is not assigned to any group")]
    Ungrouped(String),

    #[error("group {0} is empty")]
    EmptyGroup(usize),

    #[error("invalid dependencies: {0}")]
    Graph(#[from] GraphError),
}

/// Delegations plus the ordered groups they run in.
///
/// Groups run in list order with a barrier between them; members of a group
/// run concurrently. A plan with no groups runs its delegations one at a
/// time in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PlanDocument", into = "PlanDocument")]
pub struct ExecutionPlan {
    delegations: Vec<Delegation>,
    parallel_groups: Vec<Vec<String>>,
}

/// Unvalidated wire form of [`ExecutionPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanDocument {
    delegations: Vec<Delegation>,
    #[serde(default)]
    parallel_groups: Vec<Vec<String>>,
}

impl TryFrom<PlanDocument> for ExecutionPlan {
    type Error = PlanError;

    fn try_from(doc: PlanDocument) -> Result<Self, Self::Error> {
        Self::new(doc.delegations, doc.parallel_groups)
    }
}

impl From<ExecutionPlan> for PlanDocument {
    fn from(plan: ExecutionPlan) -> Self {
        Self {
            delegations: plan.delegations,
            parallel_groups: plan.parallel_groups,
        }
    }
}

impl ExecutionPlan {
    /// Validates that ids are unique and, when groups are given, that every
    /// delegation sits in exactly one non-empty group.
    pub fn new(
        delegations: Vec<Delegation>,
        parallel_groups: Vec<Vec<String>>,
    ) -> Result<Self, PlanError> {
        let mut ids = HashSet::new();
        for delegation in &delegations {
            if !ids.insert(delegation.id.as_str()) {
                return Err(PlanError::DuplicateDelegation(delegation.id.clone()));
            }
        }

        if !parallel_groups.is_empty() {
            let mut grouped = HashSet::new();
            for (index, group) in parallel_groups.iter().enumerate() {
                if group.is_empty() {
                    return Err(PlanError::EmptyGroup(index));
                }
                for id in group {
                    if !ids.contains(id.as_str()) {
                        return Err(PlanError::UnknownDelegation {
                            group: index,
                            id: id.clone(),
                        });
                    }
                    if !grouped.insert(id.as_str()) {
                        return Err(PlanError::DuplicateGroupMember(id.clone()));
                    }
                }
            }
            if let Some(missing) = delegations.iter().find(|d| !grouped.contains(d.id.as_str())) {
                return Err(PlanError::Ungrouped(missing.id.clone()));
            }
        }

        Ok(Self {
            delegations,
            parallel_groups,
        })
    }

    /// A plan without grouping.
    pub fn sequential(delegations: Vec<Delegation>) -> Result<Self, PlanError> {
        Self::new(delegations, Vec::new())
    }

    /// Derives groups from `(delegation, depends_on)` edges.
    ///
    /// Each group is one dependency level, so no member depends on another
    /// member of its own group.
    pub fn from_dependencies<'a>(
        delegations: Vec<Delegation>,
        dependencies: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, PlanError> {
        let mut graph = DependencyGraph::new();
        for delegation in &delegations {
            graph.add_node(NodeId::new(delegation.id.as_str()))?;
        }
        for (node, depends_on) in dependencies {
            graph.add_dependency(NodeId::new(node), NodeId::new(depends_on))?;
        }

        let groups = graph
            .levels()?
            .into_iter()
            .map(|level| level.into_iter().map(NodeId::into_string).collect())
            .collect();
        Self::new(delegations, groups)
    }

    pub fn delegations(&self) -> &[Delegation] {
        &self.delegations
    }

    pub fn parallel_groups(&self) -> &[Vec<String>] {
        &self.parallel_groups
    }

    pub fn delegation(&self, id: &str) -> Option<&Delegation> {
        self.delegations.iter().find(|d| d.id == id)
    }

    pub fn is_grouped(&self) -> bool {
        !self.parallel_groups.is_empty()
    }

    pub fn len(&self) -> usize {
        self.delegations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }

    /// Graphviz rendering. Each delegation points at every member of the
    /// next group; an ungrouped plan renders as a chain.
    pub fn to_dot(&self) -> String {
        let mut graph = DiGraph::<String, ()>::new();
        let mut nodes = HashMap::new();
        for delegation in &self.delegations {
            let label = format!("{} ({})", delegation.id, delegation.target);
            nodes.insert(delegation.id.as_str(), graph.add_node(label));
        }

        let stages: Vec<Vec<&str>> = if self.is_grouped() {
            self.parallel_groups
                .iter()
                .map(|g| g.iter().map(String::as_str).collect())
                .collect()
        } else {
            self.delegations.iter().map(|d| vec![d.id.as_str()]).collect()
        };

        for pair in stages.windows(2) {
            for from in &pair[0] {
                for to in &pair[1] {
                    if let (Some(&a), Some(&b)) = (nodes.get(from), nodes.get(to)) {
                        graph.add_edge(a, b, ());
                    }
                }
            }
        }

        format!("{:?}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}
