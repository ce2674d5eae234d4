//! Fluent pipeline builder.

use super::{Edge, GraphModel, Node, PipelineEngine};
use crate::config::EngineConfig;
use crate::errors::PipelineValidationError;
use crate::events::PipelineEventHandler;
use crate::steps::StepExecutor;
use std::fmt;
use std::sync::Arc;

/// Builder for validated pipelines.
///
/// Nodes and edges may be added in any order; the whole graph is validated
/// once in [`PipelineBuilder::build`].
pub struct PipelineBuilder {
    name: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    config: EngineConfig,
    event_handler: Option<Arc<dyn PipelineEventHandler>>,
}

impl PipelineBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            config: EngineConfig::default(),
            event_handler: None,
        }
    }

    /// Adds a fully configured node.
    #[must_use]
    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds a node with default policy.
    #[must_use]
    pub fn step(self, id: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        self.add_node(Node::new(id, executor))
    }

    /// Adds an edge between two nodes.
    #[must_use]
    pub fn add_edge(self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.add_edge_with(Edge::new(source, target))
    }

    /// Adds a configured edge.
    #[must_use]
    pub fn add_edge_with(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Connects the given node ids into a linear sequence.
    #[must_use]
    pub fn chain(mut self, ids: &[&str]) -> Self {
        for pair in ids.windows(2) {
            self.edges.push(Edge::new(pair[0], pair[1]));
        }
        self
    }

    /// Sets the event handler of the built engine.
    #[must_use]
    pub fn with_event_handler(mut self, handler: Arc<dyn PipelineEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Sets the configuration of the built engine.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of nodes added so far.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Validates and returns the graph alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is empty or violates a structural rule.
    pub fn build_graph(self) -> Result<GraphModel, PipelineValidationError> {
        GraphModel::new(self.name, self.nodes, self.edges)
    }

    /// Validates the graph and returns a ready engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is empty or violates a structural rule.
    pub fn build(mut self) -> Result<PipelineEngine, PipelineValidationError> {
        let config = std::mem::take(&mut self.config);
        let handler = self.event_handler.take();

        let mut engine = PipelineEngine::new(self.build_graph()?).with_config(config);
        if let Some(handler) = handler {
            engine = engine.with_event_handler(handler);
        }
        Ok(engine)
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .field("edges", &self.edges)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::codes;
    use crate::testing::ValueStep;
    use serde_json::json;

    fn value(v: i64) -> Arc<dyn StepExecutor> {
        Arc::new(ValueStep::new(json!(v)))
    }

    #[test]
    fn test_builder_creation() {
        let builder = PipelineBuilder::new("test");
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.node_count(), 0);
    }

    #[test]
    fn test_builder_chain() {
        let graph = PipelineBuilder::new("test")
            .step("a", value(1))
            .step("b", value(2))
            .step("c", value(3))
            .chain(&["a", "b", "c"])
            .build_graph()
            .unwrap();

        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.predecessors("c"), vec!["b"]);
        assert_eq!(graph.terminal_nodes(), vec!["c"]);
    }

    #[test]
    fn test_builder_edges_before_nodes() {
        let graph = PipelineBuilder::new("test")
            .add_edge("a", "b")
            .step("b", value(2))
            .step("a", value(1))
            .build_graph()
            .unwrap();

        assert_eq!(graph.topology().order(), vec!["a", "b"]);
    }

    #[test]
    fn test_builder_empty_build() {
        let err = PipelineBuilder::new("test").build().unwrap_err();
        assert_eq!(err.code(), Some(codes::EMPTY));
    }

    #[test]
    fn test_builder_missing_node() {
        let err = PipelineBuilder::new("test")
            .step("a", value(1))
            .add_edge("a", "missing")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::UNKNOWN_NODE));
    }

    #[test]
    fn test_builder_cycle_detection() {
        let err = PipelineBuilder::new("test")
            .step("a", value(1))
            .step("b", value(2))
            .step("c", value(3))
            .chain(&["a", "b", "c", "a"])
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some(codes::CYCLE));
        assert_eq!(err.nodes, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_builder_build_success() {
        let engine = PipelineBuilder::new("test")
            .step("a", value(1))
            .with_config(EngineConfig::default().with_max_concurrency(4))
            .with_event_handler(Arc::new(crate::events::NoOpEventHandler))
            .build()
            .unwrap();

        assert_eq!(engine.name(), "test");
        assert_eq!(engine.config().max_concurrency, Some(4));
    }
}
