//! # Dagflow
//!
//! A DAG pipeline orchestration engine.
//!
//! Dagflow runs a directed acyclic graph of asynchronous steps with support for:
//!
//! - **Eager dispatch**: a node starts as soon as its own upstream nodes finish
//! - **Data flow along edges**: upstream outputs become named downstream inputs
//! - **Conditional nodes**: predicates over the run context gate execution
//! - **Retries and timeouts**: exponential backoff with jitter, per-attempt limits
//! - **Failure strategies**: skip downstream, propagate absent values, or abort
//! - **Lifecycle events**: ordered, isolated delivery to an event handler
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dagflow::prelude::*;
//!
//! let engine = PipelineBuilder::new("my-pipeline")
//!     .step("fetch", Arc::new(FetchStep::new()))
//!     .step("process", Arc::new(ProcessStep::new()))
//!     .step("store", Arc::new(StoreStep::new()))
//!     .chain(&["fetch", "process", "store"])
//!     .build()?;
//!
//! let result = engine.run_with_inputs(json!({"url": "..."})).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod steps;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::EngineConfig;
    pub use crate::context::{ExecutionContext, NodeInputs};
    pub use crate::core::{
        ExecutionTraceEntry, NodeResult, NodeStatus, PipelineResult, TraceStatus, UsageRecord,
        UsageSummary,
    };
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, DagflowError, PipelineValidationError, StepError,
    };
    pub use crate::events::{
        CollectingEventHandler, LoggingEventHandler, NoOpEventHandler, PipelineEvent,
        PipelineEventHandler,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        Edge, FailureStrategy, GraphModel, Node, OutputSelector, PipelineBuilder, PipelineEngine,
    };
    pub use crate::steps::{
        route_is, Agent, AgentResponse, AgentStep, AsyncFnStep, BatchStep, BranchStep, FanInStep,
        FanOutStep, FnStep, ReasoningPattern, ReasoningStep, StepExecutor,
    };
}
