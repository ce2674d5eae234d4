//! Per-node and per-run result types.

use super::{NodeStatus, TraceStatus, UsageSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Terminal record for one node in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// The node that produced this result.
    pub node_id: String,
    /// The executor's output, absent unless the node succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Whether the executor returned a value.
    pub success: bool,
    /// Message of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the node was skipped without running.
    #[serde(default)]
    pub skipped: bool,
    /// Why the node was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Wall time spent from first attempt to terminal state.
    #[serde(default)]
    pub latency_ms: f64,
    /// Attempts actually made; zero for skipped nodes.
    #[serde(default)]
    pub attempts: u32,
}

impl NodeResult {
    /// Creates a successful result.
    #[must_use]
    pub fn succeeded(
        node_id: impl Into<String>,
        output: serde_json::Value,
        latency_ms: f64,
        attempts: u32,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            output: Some(output),
            success: true,
            error: None,
            skipped: false,
            skip_reason: None,
            latency_ms,
            attempts,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failed(
        node_id: impl Into<String>,
        error: impl Into<String>,
        latency_ms: f64,
        attempts: u32,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            output: None,
            success: false,
            error: Some(error.into()),
            skipped: false,
            skip_reason: None,
            latency_ms,
            attempts,
        }
    }

    /// Creates a skipped result.
    #[must_use]
    pub fn skipped(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            output: None,
            success: false,
            error: None,
            skipped: true,
            skip_reason: Some(reason.into()),
            latency_ms: 0.0,
            attempts: 0,
        }
    }

    /// Returns the terminal status this result represents.
    #[must_use]
    pub fn status(&self) -> NodeStatus {
        if self.skipped {
            NodeStatus::Skipped
        } else if self.success {
            NodeStatus::Succeeded
        } else {
            NodeStatus::Failed
        }
    }

    /// Returns true if the node failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status() == NodeStatus::Failed
    }
}

/// Ordered, append-only log entry for one node transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTraceEntry {
    /// The node.
    pub node_id: String,
    /// The transition recorded.
    pub status: TraceStatus,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// Time spent in the node before the transition.
    pub duration_ms: f64,
}

impl ExecutionTraceEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn now(node_id: impl Into<String>, status: TraceStatus, duration_ms: f64) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            timestamp: Utc::now(),
            duration_ms,
        }
    }

    /// Creates an entry stamped with `timestamp`.
    #[must_use]
    pub fn at(
        node_id: impl Into<String>,
        status: TraceStatus,
        timestamp: DateTime<Utc>,
        duration_ms: f64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            timestamp,
            duration_ms,
        }
    }
}

/// Aggregate result of a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Name of the pipeline.
    pub pipeline_name: String,
    /// Result of every node that reached a terminal state.
    pub outputs: HashMap<String, NodeResult>,
    /// Output of the succeeded sink node, or an object keyed by sink id
    /// when several sinks succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<serde_json::Value>,
    /// Transitions in the order they happened.
    pub execution_trace: Vec<ExecutionTraceEntry>,
    /// End-to-end run time.
    pub total_duration_ms: f64,
    /// True iff no node failed and the run was not aborted.
    pub success: bool,
    /// Nodes that failed, in the order they failed.
    pub failed_nodes: Vec<String>,
    /// Whether a fail-pipeline node aborted the run.
    #[serde(default)]
    pub aborted: bool,
    /// In-flight nodes cancelled by an abort.
    #[serde(default)]
    pub cancelled_nodes: Vec<String>,
    /// Nodes never dispatched because of an abort.
    #[serde(default)]
    pub pending_nodes: Vec<String>,
    /// Aggregated usage reported by executors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
}

impl PipelineResult {
    /// Returns the result of a node.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeResult> {
        self.outputs.get(node_id)
    }

    /// Returns the output of a node, if it succeeded.
    #[must_use]
    pub fn output_of(&self, node_id: &str) -> Option<&serde_json::Value> {
        self.outputs.get(node_id).and_then(|r| r.output.as_ref())
    }

    /// Returns the ids of succeeded nodes, sorted.
    #[must_use]
    pub fn succeeded_nodes(&self) -> Vec<String> {
        self.nodes_with_status(NodeStatus::Succeeded)
    }

    /// Returns the ids of skipped nodes, sorted.
    #[must_use]
    pub fn skipped_nodes(&self) -> Vec<String> {
        self.nodes_with_status(NodeStatus::Skipped)
    }

    fn nodes_with_status(&self, status: NodeStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .outputs
            .values()
            .filter(|r| r.status() == status)
            .map(|r| r.node_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_result_status() {
        assert_eq!(NodeResult::succeeded("a", json!(1), 1.0, 1).status(), NodeStatus::Succeeded);
        assert_eq!(NodeResult::failed("a", "boom", 1.0, 3).status(), NodeStatus::Failed);
        assert_eq!(NodeResult::skipped("a", "condition not met").status(), NodeStatus::Skipped);
    }

    #[test]
    fn test_skipped_result_has_no_attempts() {
        let result = NodeResult::skipped("a", "condition not met");
        assert_eq!(result.attempts, 0);
        assert!(!result.is_failed());
        assert_eq!(result.skip_reason.as_deref(), Some("condition not met"));
    }

    #[test]
    fn test_pipeline_result_helpers() {
        let mut result = PipelineResult::default();
        result.outputs.insert("b".into(), NodeResult::succeeded("b", json!(2), 0.0, 1));
        result.outputs.insert("a".into(), NodeResult::succeeded("a", json!(1), 0.0, 1));
        result.outputs.insert("c".into(), NodeResult::skipped("c", "upstream"));

        assert_eq!(result.succeeded_nodes(), vec!["a", "b"]);
        assert_eq!(result.skipped_nodes(), vec!["c"]);
        assert_eq!(result.output_of("a"), Some(&json!(1)));
        assert_eq!(result.output_of("c"), None);
    }

    #[test]
    fn test_node_result_serialization_omits_absent_fields() {
        let json = serde_json::to_value(NodeResult::succeeded("a", json!("x"), 2.5, 1)).unwrap();
        assert_eq!(json["output"], json!("x"));
        assert!(json.get("error").is_none());
        assert!(json.get("skip_reason").is_none());
    }
}
