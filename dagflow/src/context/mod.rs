//! Execution context for pipeline runs.
//!
//! This module provides:
//! - The per-run data bus with write-once node results
//! - Resolved node inputs assembled from incoming edges

mod execution;
mod inputs;

pub use execution::{ExecutionContext, MemoryHandle};
pub use inputs::{NodeInputs, DEFAULT_INPUT_KEY};
