//! Testing utilities for dagflow pipelines.
//!
//! This module provides:
//! - Mock step executors with call counting
//! - An ordered execution log
//! - Assertions over pipeline results

mod assertions;
mod mocks;

pub use assertions::{
    assert_node_absent, assert_node_failed, assert_node_skipped, assert_node_status,
    assert_node_succeeded, assert_ran_before,
};
pub use mocks::{ExecutionLog, FailingStep, FlakyStep, RecordingStep, SlowStep, ValueStep};
