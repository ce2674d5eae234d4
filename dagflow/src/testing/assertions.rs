//! Test assertions for pipeline results.

use super::ExecutionLog;
use crate::core::{NodeStatus, PipelineResult};

/// Asserts that a node reached the expected terminal status.
pub fn assert_node_status(result: &PipelineResult, node_id: &str, expected: NodeStatus) {
    let actual = result.node(node_id).map(|r| r.status());
    assert_eq!(
        actual,
        Some(expected),
        "Expected node '{node_id}' to be {expected}, got {actual:?}"
    );
}

/// Asserts that a node succeeded.
pub fn assert_node_succeeded(result: &PipelineResult, node_id: &str) {
    assert_node_status(result, node_id, NodeStatus::Succeeded);
}

/// Asserts that a node failed.
pub fn assert_node_failed(result: &PipelineResult, node_id: &str) {
    assert_node_status(result, node_id, NodeStatus::Failed);
}

/// Asserts that a node was skipped.
pub fn assert_node_skipped(result: &PipelineResult, node_id: &str) {
    assert_node_status(result, node_id, NodeStatus::Skipped);
}

/// Asserts that a node never reached a terminal state.
pub fn assert_node_absent(result: &PipelineResult, node_id: &str) {
    assert!(
        result.node(node_id).is_none(),
        "Expected no result for node '{node_id}', got {:?}",
        result.node(node_id)
    );
}

/// Asserts that `first` was executed before `second`.
pub fn assert_ran_before(log: &ExecutionLog, first: &str, second: &str) {
    match (log.position(first), log.position(second)) {
        (Some(a), Some(b)) => assert!(
            a < b,
            "Expected '{first}' to run before '{second}', log: {:?}",
            log.entries()
        ),
        _ => panic!(
            "Expected both '{first}' and '{second}' to run, log: {:?}",
            log.entries()
        ),
    }
}
