//! Pipeline building and execution.
//!
//! This module provides:
//! - Node and edge declarations
//! - A validated graph model with topological levels
//! - A fluent builder
//! - The eager-dispatch execution engine
//! - Retry backoff and failure strategies

mod builder;
mod engine;
mod failure;
mod graph;
mod retry;
mod spec;
mod topology;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use engine::PipelineEngine;
pub use failure::{FailureCollector, FailureRecord, FailureStrategy};
pub use graph::GraphModel;
pub use retry::{base_delay, BackoffPolicy, RetryDecision};
pub use spec::{Condition, Edge, Node, OutputSelector, DEFAULT_BACKOFF_FACTOR};
pub use topology::Topology;
