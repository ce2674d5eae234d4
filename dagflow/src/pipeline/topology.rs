//! Topological layering of a graph.

use super::GraphModel;
use crate::errors::CycleDetectedError;
use std::collections::{HashMap, HashSet};

/// Dependency levels of a graph.
///
/// Every node appears in exactly one level, and for every edge `(a, b)`
/// `level_of(a) < level_of(b)`. Within a level nodes keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    levels: Vec<Vec<String>>,
    level_of: HashMap<String, usize>,
}

impl Topology {
    /// Resolves the levels of `graph` by Kahn-style layering.
    ///
    /// # Errors
    ///
    /// Returns the offending cycle if the edges are not acyclic.
    pub fn resolve(graph: &GraphModel) -> Result<Self, CycleDetectedError> {
        let mut in_degree: HashMap<&str, usize> = graph
            .nodes()
            .map(|n| (n.id.as_str(), graph.predecessors(&n.id).len()))
            .collect();

        let mut current: Vec<&str> = graph
            .nodes()
            .map(|n| n.id.as_str())
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut level_of = HashMap::with_capacity(graph.node_count());

        while !current.is_empty() {
            let mut next: Vec<&str> = Vec::new();
            for id in &current {
                for succ in graph.successors(id) {
                    if let Some(count) = in_degree.get_mut(succ) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            next.push(succ);
                        }
                    }
                }
            }
            next.sort_by_key(|id| graph.position(id));

            for id in &current {
                level_of.insert((*id).to_string(), levels.len());
            }
            levels.push(current.iter().map(|id| (*id).to_string()).collect());
            current = next;
        }

        if level_of.len() < graph.node_count() {
            let remaining: HashSet<&str> = graph
                .nodes()
                .map(|n| n.id.as_str())
                .filter(|id| !level_of.contains_key(*id))
                .collect();
            return Err(CycleDetectedError::new(find_cycle(graph, &remaining)));
        }

        Ok(Self { levels, level_of })
    }

    /// Returns the levels, earliest first.
    #[must_use]
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// Returns all node ids in a topological order.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.levels
            .iter()
            .flat_map(|level| level.iter().map(String::as_str))
            .collect()
    }

    /// Returns the level index of a node.
    #[must_use]
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.level_of.get(id).copied()
    }

    /// Returns the number of levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Returns true if there are no levels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Extracts one concrete cycle among the nodes Kahn's algorithm could not place.
///
/// Every such node has a predecessor in the same set, so walking predecessors
/// must revisit a node.
fn find_cycle(graph: &GraphModel, remaining: &HashSet<&str>) -> Vec<String> {
    let Some(mut current) = graph
        .nodes()
        .map(|n| n.id.as_str())
        .find(|id| remaining.contains(id))
    else {
        return Vec::new();
    };

    let mut path: Vec<&str> = Vec::new();
    loop {
        if let Some(pos) = path.iter().position(|id| *id == current) {
            // The walk went against edge direction; reverse it, then start at
            // the earliest-inserted node.
            let mut cycle: Vec<String> = path[pos..].iter().rev().map(|s| (*s).to_string()).collect();
            let start = cycle
                .iter()
                .enumerate()
                .min_by_key(|(_, id)| graph.position(id))
                .map_or(0, |(i, _)| i);
            cycle.rotate_left(start);
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return cycle;
        }
        path.push(current);

        match graph
            .predecessors(current)
            .into_iter()
            .find(|p| remaining.contains(p))
        {
            Some(pred) => current = pred,
            None => return path.iter().rev().map(|s| (*s).to_string()).collect(),
        }
    }
}
