use super::{GraphError, GraphResult, NodeId};
use std::collections::{HashMap, HashSet, VecDeque};

/// A directed acyclic graph of "node depends on dependency" edges.
///
/// Nodes are stored densely by insertion index; every ordering this type
/// produces breaks ties by insertion order, so results are deterministic.
///
/// # Example
///
/// ```
/// use praxis::graph::{DependencyGraph, NodeId};
///
/// let mut graph = DependencyGraph::new();
/// for id in ["research", "draft", "review", "lint"] {
///     graph.add_node(NodeId::new(id)).unwrap();
/// }
/// graph.add_dependency("draft".into(), "research".into()).unwrap();
/// graph.add_dependency("review".into(), "draft".into()).unwrap();
///
/// let levels = graph.levels().unwrap();
/// assert_eq!(levels.len(), 3);
/// assert_eq!(levels[0], vec![NodeId::new("research"), NodeId::new("lint")]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    /// `predecessors[i]`: nodes that must finish before `i`.
    predecessors: Vec<Vec<usize>>,
    /// `successors[i]`: nodes waiting on `i`.
    successors: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn add_node(&mut self, id: NodeId) -> GraphResult<()> {
        if self.index.contains_key(&id) {
            return Err(GraphError::duplicate_node(id));
        }
        self.index.insert(id.clone(), self.ids.len());
        self.ids.push(id);
        self.predecessors.push(Vec::new());
        self.successors.push(Vec::new());
        Ok(())
    }

    /// Declares that `node` cannot start until `dependency` has finished.
    ///
    /// Idempotent for an existing edge. Rejects self-dependencies, unknown
    /// nodes, and any edge that would close a cycle; on error the graph is
    /// unchanged.
    pub fn add_dependency(&mut self, node: NodeId, dependency: NodeId) -> GraphResult<()> {
        if node == dependency {
            return Err(GraphError::self_dependency(node));
        }
        let Some(&to) = self.index.get(&node) else {
            return Err(GraphError::node_not_found(node));
        };
        let Some(&from) = self.index.get(&dependency) else {
            return Err(GraphError::dependency_not_found(node, dependency));
        };

        if self.predecessors[to].contains(&from) {
            return Ok(());
        }

        // The new edge from -> to closes a cycle iff `from` is already reachable from `to`.
        if self.reaches(to, from) {
            return Err(GraphError::cycle(format!(
                "adding dependency {} -> {} would create a cycle",
                dependency, node
            )));
        }

        self.predecessors[to].push(from);
        self.successors[from].push(to);
        Ok(())
    }

    pub fn add_dependencies(
        &mut self,
        node: NodeId,
        dependencies: impl IntoIterator<Item = NodeId>,
    ) -> GraphResult<()> {
        for dependency in dependencies {
            self.add_dependency(node.clone(), dependency)?;
        }
        Ok(())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Node ids in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.ids.iter()
    }

    /// Direct dependencies of `id`, in declaration order.
    pub fn dependencies_of(&self, id: &NodeId) -> Option<Vec<&NodeId>> {
        self.index
            .get(id)
            .map(|&i| self.predecessors[i].iter().map(|&p| &self.ids[p]).collect())
    }

    /// Nodes with no dependencies, in insertion order.
    pub fn roots(&self) -> Vec<NodeId> {
        (0..self.ids.len())
            .filter(|&i| self.predecessors[i].is_empty())
            .map(|i| self.ids[i].clone())
            .collect()
    }

    /// Returns every node in an order that respects all dependencies.
    ///
    /// Kahn's algorithm; ready nodes are taken in insertion order.
    pub fn topological_sort(&self) -> GraphResult<Vec<NodeId>> {
        Ok(self
            .topological_indices()?
            .into_iter()
            .map(|i| self.ids[i].clone())
            .collect())
    }

    /// Nodes not yet in `completed` whose dependencies are all in `completed`.
    pub fn runnable(&self, completed: &HashSet<NodeId>) -> Vec<NodeId> {
        (0..self.ids.len())
            .filter(|&i| !completed.contains(&self.ids[i]))
            .filter(|&i| {
                self.predecessors[i]
                    .iter()
                    .all(|&p| completed.contains(&self.ids[p]))
            })
            .map(|i| self.ids[i].clone())
            .collect()
    }

    /// Partitions nodes into dependency levels.
    ///
    /// Level 0 holds the roots; a node sits one level after its deepest
    /// dependency. No two nodes in the same level depend on each other, so
    /// each level may run concurrently once all earlier levels are done.
    pub fn levels(&self) -> GraphResult<Vec<Vec<NodeId>>> {
        let mut depth = vec![0usize; self.ids.len()];
        for i in self.topological_indices()? {
            let deepest = self.predecessors[i]
                .iter()
                .map(|&p| depth[p] + 1)
                .max()
                .unwrap_or(0);
            depth[i] = deepest;
        }

        let level_count = depth.iter().max().map_or(0, |d| d + 1);
        let mut levels = vec![Vec::new(); level_count];
        for (i, &d) in depth.iter().enumerate() {
            levels[d].push(self.ids[i].clone());
        }
        Ok(levels)
    }

    /// Checks the graph is non-empty and acyclic.
    pub fn validate(&self) -> GraphResult<()> {
        if self.is_empty() {
            return Err(GraphError::EmptyGraph);
        }
        self.topological_indices().map(|_| ())
    }

    fn topological_indices(&self) -> GraphResult<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..self.ids.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.ids.len());

        while let Some(i) = queue.pop_front() {
            order.push(i);
            let mut ready: Vec<usize> = Vec::new();
            for &s in &self.successors[i] {
                in_degree[s] -= 1;
                if in_degree[s] == 0 {
                    ready.push(s);
                }
            }
            ready.sort_unstable();
            queue.extend(ready);
        }

        if order.len() != self.ids.len() {
            return Err(GraphError::cycle("graph contains a cycle"));
        }
        Ok(order)
    }

    fn reaches(&self, start: usize, target: usize) -> bool {
        let mut seen = vec![false; self.ids.len()];
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            if i == target {
                return true;
            }
            if std::mem::replace(&mut seen[i], true) {
                continue;
            }
            stack.extend(self.successors[i].iter().copied());
        }
        false
    }
}
