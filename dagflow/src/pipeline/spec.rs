//! Node and edge specifications.

use super::FailureStrategy;
use crate::context::ExecutionContext;
use crate::errors::{codes, ContractErrorInfo, PipelineValidationError};
use crate::steps::StepExecutor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether a ready node executes or is skipped.
pub type Condition = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

/// Default backoff factor, in seconds.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.0;

/// A unit of work in the graph: one executor plus its execution policy.
#[derive(Clone)]
pub struct Node {
    /// Unique node id.
    pub id: String,
    /// The wrapped executor.
    pub executor: Arc<dyn StepExecutor>,
    /// Gate evaluated when the node becomes ready. `None` means always run.
    pub condition: Option<Condition>,
    /// How this node's failure affects the rest of the run.
    pub failure_strategy: FailureStrategy,
    /// Extra attempts after the first one.
    pub retry_max: u32,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Base of the exponential backoff, in seconds.
    pub backoff_factor: f64,
}

impl Node {
    /// Creates a node with default policy.
    #[must_use]
    pub fn new(id: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            id: id.into(),
            executor,
            condition: None,
            failure_strategy: FailureStrategy::default(),
            retry_max: 0,
            timeout: None,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }

    /// Sets the condition gate.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets the condition gate from a closure.
    #[must_use]
    pub fn when<F>(self, condition: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.with_condition(Arc::new(condition))
    }

    /// Sets the failure strategy.
    #[must_use]
    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }

    /// Sets the number of retries.
    #[must_use]
    pub fn with_retry_max(mut self, retry_max: u32) -> Self {
        self.retry_max = retry_max;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the backoff factor in seconds.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Maximum number of attempts this node may make.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retry_max.saturating_add(1)
    }

    /// Validates the node's policy.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty id, a zero timeout or an unusable
    /// backoff factor.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        let problem = if self.id.trim().is_empty() {
            Some("node id cannot be empty".to_string())
        } else if self.timeout == Some(Duration::ZERO) {
            Some(format!("node '{}' has a zero timeout", self.id))
        } else if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            Some(format!(
                "node '{}' has invalid backoff factor {}",
                self.id, self.backoff_factor
            ))
        } else {
            None
        };

        match problem {
            None => Ok(()),
            Some(message) => Err(PipelineValidationError::new(message.clone())
                .with_nodes(vec![self.id.clone()])
                .with_error_info(
                    ContractErrorInfo::new(codes::INVALID_POLICY, message).with_fix_hint(
                        "Use a non-empty id, a positive timeout and a finite, non-negative backoff factor.",
                    ),
                )),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("has_condition", &self.condition.is_some())
            .field("failure_strategy", &self.failure_strategy)
            .field("retry_max", &self.retry_max)
            .field("timeout", &self.timeout)
            .field("backoff_factor", &self.backoff_factor)
            .finish_non_exhaustive()
    }
}

/// Picks one element of a composite upstream output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSelector {
    /// Element at a position of a list output.
    Index(usize),
    /// Entry of a map output.
    Key(String),
}

impl OutputSelector {
    /// Selects from `output`; `None` if the element does not exist.
    #[must_use]
    pub fn select(&self, output: &Value) -> Option<Value> {
        match self {
            Self::Index(i) => output.get(*i).cloned(),
            Self::Key(k) => output.get(k.as_str()).cloned(),
        }
    }
}

/// A data and ordering dependency between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream node id.
    pub source: String,
    /// Downstream node id.
    pub target: String,
    /// Key under which the target receives the source's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_key: Option<String>,
    /// Optional element selection on the source's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<OutputSelector>,
}

impl Edge {
    /// Creates an edge from `source` to `target`.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            input_key: None,
            selector: None,
        }
    }

    /// Sets the input key.
    #[must_use]
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Delivers only the element at `index` of the source's list output.
    #[must_use]
    pub fn with_output_index(mut self, index: usize) -> Self {
        self.selector = Some(OutputSelector::Index(index));
        self
    }

    /// Delivers only the entry `key` of the source's map output.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.selector = Some(OutputSelector::Key(key.into()));
        self
    }

    /// Resolves the value this edge delivers, given the source's output.
    #[must_use]
    pub fn deliver(&self, source_output: Option<Value>) -> Option<Value> {
        let output = source_output?;
        match &self.selector {
            Some(selector) => selector.select(&output),
            None => Some(output),
        }
    }
}
