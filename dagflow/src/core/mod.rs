//! Core types: statuses, results, usage.

mod result;
mod status;
mod usage;

pub use result::{ExecutionTraceEntry, NodeResult, PipelineResult};
pub use status::{NodeStatus, TraceStatus};
pub use usage::{UsageBucket, UsageRecord, UsageSummary, UsageTracker};
