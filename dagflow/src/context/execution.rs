//! The per-run execution context.

use crate::core::{NodeResult, UsageRecord, UsageTracker};
use crate::errors::ResultConflictError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque handle to an external stateful collaborator (memory, session
/// store). The engine only forwards it.
pub type MemoryHandle = Arc<dyn Any + Send + Sync>;

/// Data bus threaded through a single run.
///
/// Created fresh per run. The only state mutated while a run is in progress
/// is the node result map, and each node id is written at most once.
pub struct ExecutionContext {
    /// The original run payload.
    inputs: Value,
    /// Cross-cutting key/value data.
    metadata: HashMap<String, Value>,
    /// Run-scoped identifier for observability correlation.
    correlation_id: String,
    /// Terminal results keyed by node id.
    results: DashMap<String, NodeResult>,
    /// Optional external collaborator.
    memory: Option<MemoryHandle>,
    /// Usage reported by executors.
    usage: UsageTracker,
}

impl ExecutionContext {
    /// Creates a context for the given inputs with a generated correlation id.
    #[must_use]
    pub fn new(inputs: Value) -> Self {
        Self {
            inputs,
            metadata: HashMap::new(),
            correlation_id: Uuid::new_v4().simple().to_string(),
            results: DashMap::new(),
            memory: None,
            usage: UsageTracker::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Attaches a memory handle.
    #[must_use]
    pub fn with_memory<T: Any + Send + Sync>(mut self, memory: Arc<T>) -> Self {
        self.memory = Some(memory as MemoryHandle);
        self
    }

    /// Returns the run inputs.
    #[must_use]
    pub fn inputs(&self) -> &Value {
        &self.inputs
    }

    /// Returns the metadata bag.
    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Returns a single metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Returns the raw memory handle.
    #[must_use]
    pub fn memory_handle(&self) -> Option<&MemoryHandle> {
        self.memory.as_ref()
    }

    /// Returns the memory handle downcast to a concrete type.
    #[must_use]
    pub fn memory<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.memory.clone()?.downcast::<T>().ok()
    }

    /// Returns true if a memory handle is attached.
    #[must_use]
    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    /// Records a node result. Each node id may be written once.
    pub(crate) fn record_result(&self, result: NodeResult) -> Result<(), ResultConflictError> {
        match self.results.entry(result.node_id.clone()) {
            Entry::Occupied(_) => Err(ResultConflictError::new(result.node_id)),
            Entry::Vacant(slot) => {
                slot.insert(result);
                Ok(())
            }
        }
    }

    /// Returns the result of a node, if it is terminal.
    #[must_use]
    pub fn node_result(&self, node_id: &str) -> Option<NodeResult> {
        self.results.get(node_id).map(|r| r.value().clone())
    }

    /// Returns the output of a node, if it succeeded.
    #[must_use]
    pub fn node_output(&self, node_id: &str) -> Option<Value> {
        self.results.get(node_id).and_then(|r| r.output.clone())
    }

    /// Returns a copy of all recorded results.
    #[must_use]
    pub fn results(&self) -> HashMap<String, NodeResult> {
        self.results
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Returns true if any node result has been recorded.
    #[must_use]
    pub fn has_results(&self) -> bool {
        !self.results.is_empty()
    }

    /// Returns the ids of nodes with a recorded result, sorted.
    #[must_use]
    pub fn completed_nodes(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.results.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Records usage reported by an executor.
    pub fn record_usage(&self, mut record: UsageRecord) {
        if record.correlation_id.is_empty() {
            record.correlation_id.clone_from(&self.correlation_id);
        }
        self.usage.record(record);
    }

    /// Returns all usage records.
    #[must_use]
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.usage.records()
    }

    pub(crate) fn usage(&self) -> &UsageTracker {
        &self.usage
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("correlation_id", &self.correlation_id)
            .field("completed_nodes", &self.completed_nodes())
            .field("has_memory", &self.has_memory())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct Notes(Vec<String>);

    #[test]
    fn test_context_defaults() {
        let ctx = ExecutionContext::new(json!({"doc": "x"}));
        assert_eq!(ctx.inputs(), &json!({"doc": "x"}));
        assert_eq!(ctx.correlation_id().len(), 32);
        assert!(ctx.metadata().is_empty());
        assert!(!ctx.has_memory());
        assert!(ctx.completed_nodes().is_empty());
    }

    #[test]
    fn test_metadata_and_correlation() {
        let ctx = ExecutionContext::new(Value::Null)
            .with_metadata("tenant", json!("acme"))
            .with_correlation_id("run-1");

        assert_eq!(ctx.metadata_value("tenant"), Some(&json!("acme")));
        assert_eq!(ctx.correlation_id(), "run-1");
    }

    #[test]
    fn test_record_result_is_write_once() {
        let ctx = ExecutionContext::default();
        ctx.record_result(NodeResult::succeeded("a", json!(1), 0.0, 1)).unwrap();

        let err = ctx
            .record_result(NodeResult::succeeded("a", json!(2), 0.0, 1))
            .unwrap_err();
        assert_eq!(err.node_id, "a");
        assert_eq!(ctx.node_output("a"), Some(json!(1)));
    }

    #[test]
    fn test_has_results() {
        let ctx = ExecutionContext::default();
        assert!(!ctx.has_results());
        ctx.record_result(NodeResult::skipped("a", "condition not met"))
            .unwrap();
        assert!(ctx.has_results());
    }

    #[test]
    fn test_node_output_absent_for_failed_node() {
        let ctx = ExecutionContext::default();
        ctx.record_result(NodeResult::failed("b", "boom", 0.0, 1)).unwrap();

        assert!(ctx.node_result("b").is_some());
        assert_eq!(ctx.node_output("b"), None);
        assert_eq!(ctx.node_output("missing"), None);
    }

    #[test]
    fn test_memory_downcast() {
        let ctx = ExecutionContext::default().with_memory(Arc::new(Notes(vec!["hi".into()])));

        assert!(ctx.has_memory());
        assert_eq!(ctx.memory::<Notes>().unwrap().0, vec!["hi".to_string()]);
        assert!(ctx.memory::<String>().is_none());
    }

    #[test]
    fn test_record_usage_stamps_correlation_id() {
        let ctx = ExecutionContext::default().with_correlation_id("run-7");
        ctx.record_usage(UsageRecord::new("agent", "model").with_tokens(1, 2));

        let records = ctx.usage_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correlation_id, "run-7");
        assert_eq!(records[0].total_tokens, 3);
    }
}
