use super::{Node, WorkflowError, WorkflowState};
use std::collections::HashMap;
use std::sync::Arc;

/// Terminal pseudo-node. Routing here completes the run.
pub const END: &str = "__end__";

type Router<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

enum Edge<S> {
    Direct(String),
    Conditional(Router<S>),
}

/// Builder for a workflow's node graph.
///
/// Every node has exactly one outgoing edge: either a fixed target or a
/// router that picks the next node from the state. Cycles are allowed;
/// each pass around one must change the state so the router eventually
/// leaves it.
///
/// # Example
///
/// ```ignore
/// let graph = WorkflowGraph::new()
///     .add_node("plan", PlanNode)
///     .add_node("execute", ExecuteNode)
///     .add_node("review", ReviewNode)
///     .set_entry("plan")
///     .add_edge("plan", "execute")
///     .add_edge("execute", "review")
///     .add_conditional_edges("review", |s: &Job| {
///         if s.approved { END.into() } else { "execute".into() }
///     })
///     .compile()?;
/// ```
pub struct WorkflowGraph<S: WorkflowState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry: Option<String>,
}

impl<S: WorkflowState> Default for WorkflowGraph<S> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            entry: None,
        }
    }
}

impl<S: WorkflowState> WorkflowGraph<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(mut self, name: impl Into<String>, node: impl Node<S> + 'static) -> Self {
        self.nodes.insert(name.into(), Arc::new(node));
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    /// Routes out of `from` by calling `router` on the state after `from` ran.
    pub fn add_conditional_edges<R>(mut self, from: impl Into<String>, router: R) -> Self
    where
        R: Fn(&S) -> String + Send + Sync + 'static,
    {
        self.edges.insert(from.into(), Edge::Conditional(Arc::new(router)));
        self
    }

    pub fn set_entry(mut self, node: impl Into<String>) -> Self {
        self.entry = Some(node.into());
        self
    }

    /// Checks the entry, edge sources, direct edge targets, and that every
    /// node has an outgoing edge. Router targets are checked when taken.
    pub fn compile(self) -> Result<CompiledGraph<S>, WorkflowError> {
        let entry = self
            .entry
            .ok_or_else(|| WorkflowError::InvalidGraph("no entry node set".into()))?;
        if !self.nodes.contains_key(&entry) {
            return Err(WorkflowError::InvalidGraph(format!(
                "entry node '{}' is not defined",
                entry
            )));
        }
        if self.nodes.contains_key(END) {
            return Err(WorkflowError::InvalidGraph(format!(
                "'{}' is reserved and cannot name a node",
                END
            )));
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(WorkflowError::InvalidGraph(format!(
                    "edge from undefined node '{}'",
                    from
                )));
            }
            if let Edge::Direct(to) = edge {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(WorkflowError::InvalidGraph(format!(
                        "edge '{}' -> '{}' targets an undefined node",
                        from, to
                    )));
                }
            }
        }

        let mut names: Vec<&String> = self.nodes.keys().collect();
        names.sort();
        if let Some(dangling) = names.into_iter().find(|n| !self.edges.contains_key(*n)) {
            return Err(WorkflowError::InvalidGraph(format!(
                "node '{}' has no outgoing edge",
                dangling
            )));
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry,
        })
    }
}

/// A validated, immutable workflow graph.
pub struct CompiledGraph<S: WorkflowState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: HashMap<String, Edge<S>>,
    entry: String,
}

impl<S: WorkflowState> CompiledGraph<S> {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub(crate) fn node(&self, name: &str) -> Option<Arc<dyn Node<S>>> {
        self.nodes.get(name).cloned()
    }

    /// The node after `from`, given the updated state. May be [`END`].
    pub fn next(&self, from: &str, state: &S) -> Result<String, WorkflowError> {
        let target = match self.edges.get(from) {
            Some(Edge::Direct(to)) => to.clone(),
            Some(Edge::Conditional(router)) => router(state),
            None => {
                return Err(WorkflowError::UnknownNode {
                    node: from.to_string(),
                })
            }
        };
        if target != END && !self.nodes.contains_key(&target) {
            return Err(WorkflowError::UnknownNode { node: target });
        }
        Ok(target)
    }
}
