//! Failure strategies and per-run failure bookkeeping.

use super::GraphModel;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// How a node's failure affects its dependents and the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Dependents still run, receiving an absent input for the failed edge.
    Propagate,
    /// All transitive dependents are skipped.
    #[default]
    SkipDownstream,
    /// The whole run aborts.
    FailPipeline,
}

impl fmt::Display for FailureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Propagate => "propagate",
            Self::SkipDownstream => "skip_downstream",
            Self::FailPipeline => "fail_pipeline",
        };
        write!(f, "{s}")
    }
}

/// Record of one failed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Node id.
    pub node_id: String,
    /// Error of the final attempt.
    pub error: String,
    /// The node's own strategy, which governs the effect.
    pub strategy: FailureStrategy,
    /// Attempts made.
    pub attempts: u32,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        error: impl Into<String>,
        strategy: FailureStrategy,
        attempts: u32,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            error: error.into(),
            strategy,
            attempts,
        }
    }
}

/// Collects failures during a run and derives their downstream effect.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Vec<FailureRecord>,
    failed: HashSet<String>,
    /// Node id -> the failed ancestor that blocks it.
    blocked: HashMap<String, String>,
    aborted: bool,
}

impl FailureCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure and applies its strategy.
    pub fn record(&mut self, record: FailureRecord, graph: &GraphModel) {
        match record.strategy {
            FailureStrategy::Propagate => {}
            FailureStrategy::SkipDownstream => {
                for dependent in graph.transitive_successors(&record.node_id) {
                    self.blocked
                        .entry(dependent)
                        .or_insert_with(|| record.node_id.clone());
                }
            }
            FailureStrategy::FailPipeline => self.aborted = true,
        }
        self.failed.insert(record.node_id.clone());
        self.failures.push(record);
    }

    /// Returns the failed ancestor blocking `node_id`, if any.
    #[must_use]
    pub fn blocked_by(&self, node_id: &str) -> Option<&str> {
        self.blocked.get(node_id).map(String::as_str)
    }

    /// Returns true if the node failed.
    #[must_use]
    pub fn has_failed(&self, node_id: &str) -> bool {
        self.failed.contains(node_id)
    }

    /// Returns true once a FAIL_PIPELINE node has failed.
    #[must_use]
    pub fn should_abort(&self) -> bool {
        self.aborted
    }

    /// Returns the first failure that aborted the run.
    #[must_use]
    pub fn abort_cause(&self) -> Option<&FailureRecord> {
        self.failures
            .iter()
            .find(|f| f.strategy == FailureStrategy::FailPipeline)
    }

    /// Returns failed node ids in failure order.
    #[must_use]
    pub fn failed_nodes(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.node_id.clone()).collect()
    }

    /// Returns all failure records.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}
