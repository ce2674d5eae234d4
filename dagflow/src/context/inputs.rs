//! Resolved inputs handed to a step executor.

use serde_json::Value;
use std::collections::BTreeMap;

/// Input key used for root nodes and for single-edge nodes without an
/// explicit key.
pub const DEFAULT_INPUT_KEY: &str = "input";

/// Inputs for one node, assembled from its incoming edges.
///
/// Every incoming edge contributes exactly one entry. The entry is `None`
/// (absent) when the upstream node failed, was skipped, or produced no
/// element for the edge's selector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInputs {
    /// The node receiving the inputs.
    node_id: String,
    /// Values keyed by input key.
    values: BTreeMap<String, Option<Value>>,
}

impl NodeInputs {
    /// Creates empty inputs for a node.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            values: BTreeMap::new(),
        }
    }

    /// Creates inputs holding a single value under [`DEFAULT_INPUT_KEY`].
    #[must_use]
    pub fn single(node_id: impl Into<String>, value: Value) -> Self {
        Self::new(node_id).with_value(DEFAULT_INPUT_KEY, Some(value))
    }

    /// Adds an entry.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: Option<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts an entry, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<Value>) {
        self.values.insert(key.into(), value);
    }

    /// Returns the node these inputs belong to.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Returns a present value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).and_then(Option::as_ref)
    }

    /// Returns the value under [`DEFAULT_INPUT_KEY`].
    #[must_use]
    pub fn input(&self) -> Option<&Value> {
        self.get(DEFAULT_INPUT_KEY)
    }

    /// Returns true if an edge delivered this key, present or absent.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns true if the key was delivered without a value.
    #[must_use]
    pub fn is_absent(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(None))
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<Value>)> {
        self.values.iter()
    }

    /// Returns the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Converts the entries to a JSON object; absent entries become `null`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().unwrap_or(Value::Null)))
                .collect(),
        )
    }
}
