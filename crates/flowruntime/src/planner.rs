use flowcore::{GraphError, NodeId, WorkflowDefinition};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Adjacency derived from a workflow definition.
///
/// Node weights are declaration indices into the definition's node list, so
/// ordering by weight is ordering by declaration.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    graph: DiGraph<usize, ()>,
    ids: Vec<NodeId>,
    index: HashMap<NodeId, NodeIndex>,
}

impl ExecutionGraph {
    /// Build the graph, rejecting duplicate ids and dangling edges.
    pub fn build(workflow: &WorkflowDefinition) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::with_capacity(workflow.nodes.len());
        let mut ids = Vec::with_capacity(workflow.nodes.len());

        for (position, node_spec) in workflow.nodes.iter().enumerate() {
            if index.contains_key(&node_spec.id) {
                return Err(GraphError::DuplicateNode(node_spec.id.clone()));
            }
            let idx = graph.add_node(position);
            index.insert(node_spec.id.clone(), idx);
            ids.push(node_spec.id.clone());
        }

        for edge in &workflow.edges {
            let lookup = |node: &NodeId| {
                index.get(node).copied().ok_or_else(|| GraphError::UnknownNode {
                    edge: edge_label(&edge.id, &edge.source, &edge.target),
                    node: node.clone(),
                })
            };
            let from = lookup(&edge.source)?;
            let to = lookup(&edge.target)?;
            graph.update_edge(from, to, ());
        }

        Ok(Self { graph, ids, index })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    /// Direct predecessors of a node, in declaration order.
    pub fn predecessors(&self, node_id: &str) -> Vec<NodeId> {
        self.neighbors(node_id, Direction::Incoming)
    }

    /// Direct dependents of a node, in declaration order.
    pub fn successors(&self, node_id: &str) -> Vec<NodeId> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    fn neighbors(&self, node_id: &str, direction: Direction) -> Vec<NodeId> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut positions: Vec<usize> = self
            .graph
            .neighbors_directed(*idx, direction)
            .map(|n| self.graph[n])
            .collect();
        positions.sort_unstable();
        positions.into_iter().map(|p| self.ids[p].clone()).collect()
    }
}

fn edge_label(id: &str, source: &str, target: &str) -> String {
    if id.is_empty() {
        format!("{}->{}", source, target)
    } else {
        id.to_string()
    }
}

/// A validated graph together with its dispatch order.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub order: Vec<NodeId>,
    pub graph: ExecutionGraph,
}

/// Compute a deterministic, dependency-respecting dispatch order.
///
/// Kahn's algorithm seeded from zero-indegree nodes; among nodes that become
/// ready together, the one declared first goes first.
pub fn plan(workflow: &WorkflowDefinition) -> Result<ExecutionPlan, GraphError> {
    let graph = ExecutionGraph::build(workflow)?;
    let order = topological_order(&graph)?;
    Ok(ExecutionPlan { order, graph })
}

fn topological_order(execution: &ExecutionGraph) -> Result<Vec<NodeId>, GraphError> {
    let graph = &execution.graph;
    let mut indegree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = graph
        .node_indices()
        .filter(|idx| indegree[idx.index()] == 0)
        .map(|idx| Reverse(graph[idx]))
        .collect();

    let mut visited = vec![false; graph.node_count()];
    let mut order = Vec::with_capacity(graph.node_count());

    while let Some(Reverse(position)) = ready.pop() {
        let idx = execution.index[&execution.ids[position]];
        visited[idx.index()] = true;
        order.push(execution.ids[position].clone());

        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            indegree[next.index()] -= 1;
            if indegree[next.index()] == 0 {
                ready.push(Reverse(graph[next]));
            }
        }
    }

    // Anything left over still has an unmet dependency, which in a graph
    // with no dangling edges means it sits on or behind a cycle.
    if order.len() < graph.node_count() {
        let mut cycle: Vec<usize> = tarjan_scc(graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || scc.iter().any(|n| graph.contains_edge(*n, *n)))
            .flatten()
            .map(|n| graph[n])
            .collect();
        cycle.sort_unstable();

        tracing::error!(
            unvisited = graph.node_count() - order.len(),
            "workflow graph contains a cycle"
        );
        return Err(GraphError::Cycle {
            nodes: cycle.into_iter().map(|p| execution.ids[p].clone()).collect(),
        });
    }

    // Exactly-once coverage: the loop above reaches every node of an acyclic
    // graph, but keep the guarantee explicit.
    for (position, seen) in visited.iter().enumerate() {
        if !seen {
            order.push(execution.ids[position].clone());
        }
    }

    Ok(order)
}
