//! Node status and trace status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a node within one run.
///
/// `Pending -> Ready -> Running -> {Succeeded | Failed | Skipped}`. A ready
/// node whose condition is false goes straight to `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting for upstream nodes.
    #[default]
    Pending,
    /// All upstream nodes are terminal.
    Ready,
    /// The executor is in flight.
    Running,
    /// The executor returned a value.
    Succeeded,
    /// All attempts failed.
    Failed,
    /// The node was not executed.
    Skipped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl NodeStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if the status does not count against run success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

/// Status recorded in an execution trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    /// The node was dispatched but cancelled before reaching a terminal state.
    Started,
    /// The node succeeded.
    Completed,
    /// The node failed.
    Failed,
    /// The node was skipped.
    Skipped,
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl From<NodeStatus> for TraceStatus {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Succeeded => Self::Completed,
            NodeStatus::Failed => Self::Failed,
            NodeStatus::Skipped => Self::Skipped,
            NodeStatus::Pending | NodeStatus::Ready | NodeStatus::Running => Self::Started,
        }
    }
}
