//! The validated, immutable graph model.

use super::{Edge, Node, Topology};
use crate::context::DEFAULT_INPUT_KEY;
use crate::errors::{codes, ContractErrorInfo, PipelineValidationError};
use std::collections::{HashMap, HashSet, VecDeque};

/// A named, validated DAG of nodes and edges.
///
/// Read-only once built; one instance may be run by many contexts at once.
#[derive(Debug, Clone)]
pub struct GraphModel {
    name: String,
    /// Nodes in insertion order.
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    /// Effective input key per edge, parallel to `edges`.
    input_keys: Vec<String>,
    /// Node id -> indices of incoming edges.
    incoming: HashMap<String, Vec<usize>>,
    /// Node id -> indices of outgoing edges.
    outgoing: HashMap<String, Vec<usize>>,
    topology: Topology,
}

impl GraphModel {
    /// Builds and validates a graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is empty, a node policy is invalid, node
    /// ids repeat, an edge references an unknown node, two edges into the
    /// same node resolve to the same input key, or the edges form a cycle.
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Result<Self, PipelineValidationError> {
        let name = name.into();
        if nodes.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{name}' has no nodes"
            ))
            .with_error_info(
                ContractErrorInfo::new(codes::EMPTY, "Cannot build an empty pipeline")
                    .with_fix_hint("Add at least one node before building."),
            ));
        }

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            node.validate()?;
            if index.insert(node.id.clone(), i).is_some() {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate node id '{}'",
                    node.id
                ))
                .with_nodes(vec![node.id.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        codes::DUPLICATE_NODE,
                        format!("Node '{}' is defined more than once", node.id),
                    )
                    .with_fix_hint("Give every node a unique id."),
                ));
            }
        }

        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            for endpoint in [&edge.source, &edge.target] {
                if !index.contains_key(endpoint) {
                    return Err(PipelineValidationError::new(format!(
                        "Edge '{}' -> '{}' references unknown node '{}'",
                        edge.source, edge.target, endpoint
                    ))
                    .with_nodes(vec![edge.source.clone(), edge.target.clone()])
                    .with_error_info(
                        ContractErrorInfo::new(
                            codes::UNKNOWN_NODE,
                            format!("Node '{endpoint}' not found"),
                        )
                        .with_context_entry("source", edge.source.clone())
                        .with_context_entry("target", edge.target.clone())
                        .with_fix_hint("Add the node before connecting it."),
                    ));
                }
            }
            incoming.entry(edge.target.clone()).or_default().push(i);
            outgoing.entry(edge.source.clone()).or_default().push(i);
        }

        let input_keys = resolve_input_keys(&edges, &incoming)?;

        let mut graph = Self {
            name,
            nodes,
            index,
            edges,
            input_keys,
            incoming,
            outgoing,
            topology: Topology::default(),
        };
        graph.topology = Topology::resolve(&graph)?;
        Ok(graph)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns the insertion position of a node.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Returns all edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Returns the resolved topology.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns the sources of a node's incoming edges, one per edge.
    #[must_use]
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.incoming_edges(id)
            .into_iter()
            .map(|e| e.source.as_str())
            .collect()
    }

    /// Returns the targets of a node's outgoing edges, one per edge.
    #[must_use]
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.outgoing
            .get(id)
            .map(|idx| idx.iter().map(|&i| self.edges[i].target.as_str()).collect())
            .unwrap_or_default()
    }

    /// Returns a node's incoming edges.
    #[must_use]
    pub fn incoming_edges(&self, id: &str) -> Vec<&Edge> {
        self.incoming
            .get(id)
            .map(|idx| idx.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Returns a node's incoming edges paired with their effective input keys.
    #[must_use]
    pub fn input_bindings(&self, id: &str) -> Vec<(&Edge, &str)> {
        self.incoming
            .get(id)
            .map(|idx| {
                idx.iter()
                    .map(|&i| (&self.edges[i], self.input_keys[i].as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns true if the node has no incoming edges.
    #[must_use]
    pub fn is_root(&self, id: &str) -> bool {
        self.incoming.get(id).map_or(true, Vec::is_empty)
    }

    /// Returns the nodes with no outgoing edges, in insertion order.
    #[must_use]
    pub fn terminal_nodes(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| self.outgoing.get(*id).map_or(true, Vec::is_empty))
            .collect()
    }

    /// Returns every node reachable from `id`, in insertion order.
    #[must_use]
    pub fn transitive_successors(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = self.successors(id).into_iter().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                queue.extend(self.successors(next));
            }
        }

        self.nodes
            .iter()
            .filter(|n| seen.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect()
    }
}

/// Computes the effective input key of every edge and rejects collisions.
fn resolve_input_keys(
    edges: &[Edge],
    incoming: &HashMap<String, Vec<usize>>,
) -> Result<Vec<String>, PipelineValidationError> {
    let keys: Vec<String> = edges
        .iter()
        .map(|edge| match &edge.input_key {
            Some(key) => key.clone(),
            None if incoming.get(&edge.target).map_or(0, Vec::len) == 1 => {
                DEFAULT_INPUT_KEY.to_string()
            }
            None => edge.source.clone(),
        })
        .collect();

    for (target, idx) in incoming {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for &i in idx {
            let source = edges[i].source.as_str();
            if let Some(first) = seen.insert(keys[i].as_str(), source) {
                return Err(PipelineValidationError::new(format!(
                    "Node '{target}' receives input key '{}' from both '{first}' and '{source}'",
                    keys[i]
                ))
                .with_nodes(vec![target.clone(), first.to_string(), source.to_string()])
                .with_error_info(
                    ContractErrorInfo::new(
                        codes::INPUT_KEY_CONFLICT,
                        format!("Input key '{}' is used twice", keys[i]),
                    )
                    .with_fix_hint("Give each incoming edge a distinct input key."),
                ));
            }
        }
    }

    Ok(keys)
}
