//! Pipeline event handler trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, Level};

/// A lifecycle event emitted during a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A node's executor is about to be invoked for the first time.
    NodeStarted {
        /// Node id.
        node_id: String,
        /// Pipeline name.
        pipeline: String,
    },
    /// A node succeeded.
    NodeCompleted {
        /// Node id.
        node_id: String,
        /// Pipeline name.
        pipeline: String,
        /// Node latency in milliseconds.
        latency_ms: f64,
    },
    /// A node failed after exhausting its attempts.
    NodeFailed {
        /// Node id.
        node_id: String,
        /// Pipeline name.
        pipeline: String,
        /// Error message of the final attempt.
        error: String,
    },
    /// A node was skipped.
    NodeSkipped {
        /// Node id.
        node_id: String,
        /// Pipeline name.
        pipeline: String,
        /// Why the node was skipped.
        reason: String,
    },
    /// The run finished.
    PipelineCompleted {
        /// Pipeline name.
        pipeline: String,
        /// Whether the run succeeded.
        success: bool,
        /// Run duration in milliseconds.
        duration_ms: f64,
    },
}

impl PipelineEvent {
    /// Returns the dotted event type, e.g. `node.completed`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeStarted { .. } => "node.started",
            Self::NodeCompleted { .. } => "node.completed",
            Self::NodeFailed { .. } => "node.failed",
            Self::NodeSkipped { .. } => "node.skipped",
            Self::PipelineCompleted { .. } => "pipeline.completed",
        }
    }

    /// Returns the node id for node-scoped events.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeSkipped { node_id, .. } => Some(node_id),
            Self::PipelineCompleted { .. } => None,
        }
    }
}

/// Observer of pipeline lifecycle events.
///
/// Every hook is optional. Errors (and panics) raised by a hook are logged
/// by the dispatcher and never affect the run.
#[async_trait]
pub trait PipelineEventHandler: Send + Sync {
    /// Called before a node's first attempt.
    async fn on_node_start(&self, _node_id: &str, _pipeline: &str) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when a node succeeds.
    async fn on_node_complete(
        &self,
        _node_id: &str,
        _pipeline: &str,
        _latency_ms: f64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when a node fails.
    async fn on_node_error(
        &self,
        _node_id: &str,
        _pipeline: &str,
        _error: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when a node is skipped.
    async fn on_node_skip(
        &self,
        _node_id: &str,
        _pipeline: &str,
        _reason: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the run finishes.
    async fn on_pipeline_complete(
        &self,
        _pipeline: &str,
        _success: bool,
        _duration_ms: f64,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Routes an event to its hook.
    async fn handle(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        match event {
            PipelineEvent::NodeStarted { node_id, pipeline } => {
                self.on_node_start(node_id, pipeline).await
            }
            PipelineEvent::NodeCompleted {
                node_id,
                pipeline,
                latency_ms,
            } => self.on_node_complete(node_id, pipeline, *latency_ms).await,
            PipelineEvent::NodeFailed {
                node_id,
                pipeline,
                error,
            } => self.on_node_error(node_id, pipeline, error).await,
            PipelineEvent::NodeSkipped {
                node_id,
                pipeline,
                reason,
            } => self.on_node_skip(node_id, pipeline, reason).await,
            PipelineEvent::PipelineCompleted {
                pipeline,
                success,
                duration_ms,
            } => {
                self.on_pipeline_complete(pipeline, *success, *duration_ms)
                    .await
            }
        }
    }
}

/// Handler that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventHandler;

#[async_trait]
impl PipelineEventHandler for NoOpEventHandler {}

/// Handler that writes events to the tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingEventHandler {
    level: Level,
}

impl Default for LoggingEventHandler {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventHandler {
    /// Creates a handler logging at `level` (debug or info).
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level handler.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl PipelineEventHandler for LoggingEventHandler {
    async fn handle(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        let event_type = event.event_type();
        let node_id = event.node_id().unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event_type, node_id, event = ?event, "Event: {}", event_type);
        } else {
            info!(event_type, node_id, event = ?event, "Event: {}", event_type);
        }
        Ok(())
    }
}

/// Handler that keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventHandler {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventHandler {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in delivery order.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns node ids of events of exactly `event_type`, in order.
    #[must_use]
    pub fn node_ids(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .filter_map(|e| e.node_id().map(str::to_string))
            .collect()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl PipelineEventHandler for CollectingEventHandler {
    async fn handle(&self, event: &PipelineEvent) -> anyhow::Result<()> {
        self.events.write().push(event.clone());
        Ok(())
    }
}
