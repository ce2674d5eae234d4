//! Error types for the dagflow engine.
//!
//! Structural errors (cycles, unknown nodes, duplicate ids) are raised while a
//! graph is built and never reach a running pipeline. Node execution errors are
//! expressed as [`StepError`] and contained by the scheduler.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The main error type for dagflow operations.
#[derive(Debug, Error)]
pub enum DagflowError {
    /// A graph validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A cycle was detected in the graph.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// A node result was written twice.
    #[error("{0}")]
    ResultConflict(#[from] ResultConflictError),

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Metadata about a structural error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-003-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error codes attached to [`PipelineValidationError`]s.
pub mod codes {
    /// Two nodes share an id.
    pub const DUPLICATE_NODE: &str = "GRAPH-001-DUPLICATE_NODE";
    /// An edge references a node that does not exist.
    pub const UNKNOWN_NODE: &str = "GRAPH-002-UNKNOWN_NODE";
    /// The edge set contains a cycle.
    pub const CYCLE: &str = "GRAPH-003-CYCLE";
    /// The graph has no nodes.
    pub const EMPTY: &str = "GRAPH-004-EMPTY";
    /// Two incoming edges of a node resolve to the same input key.
    pub const INPUT_KEY_CONFLICT: &str = "GRAPH-005-INPUT_KEY_CONFLICT";
    /// A node carries an unusable execution policy.
    pub const INVALID_POLICY: &str = "GRAPH-006-INVALID_POLICY";
}

/// Error raised when graph validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The nodes involved in the error.
    pub nodes: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of nodes forming the cycle, first node repeated at the end.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            codes::CYCLE,
            format!("Graph contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the edges in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        PipelineValidationError {
            message: err.to_string(),
            nodes: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when a node result is written more than once.
#[derive(Debug, Clone, Error)]
#[error("Result conflict: node '{node_id}' already has a recorded result")]
pub struct ResultConflictError {
    /// The node whose result already exists.
    pub node_id: String,
}

impl ResultConflictError {
    /// Creates a new result conflict error.
    #[must_use]
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

/// Failure raised by a step executor for a single attempt.
#[derive(Debug, Error)]
pub enum StepError {
    /// A failure that may succeed when retried.
    #[error("{0}")]
    Failed(String),

    /// A failure that retrying cannot fix.
    #[error("{0}")]
    Permanent(String),

    /// The attempt exceeded the node's timeout.
    #[error("attempt timed out after {:.3}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Any other executor error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// Creates a retryable failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Creates a failure that must not be retried.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Returns true if the engine may retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Extracts the message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
