//! Mock step executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{ExecutionContext, NodeInputs};
use crate::errors::StepError;
use crate::steps::StepExecutor;

/// A step that always returns the same value.
#[derive(Debug)]
pub struct ValueStep {
    value: Value,
    calls: AtomicU32,
}

impl ValueStep {
    /// Creates a new value step.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            calls: AtomicU32::new(0),
        }
    }

    /// Returns the number of times the step was called.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for ValueStep {
    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        _inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.clone())
    }
}

/// A step that always fails.
#[derive(Debug)]
pub struct FailingStep {
    error: String,
    permanent: bool,
    calls: AtomicU32,
}

impl FailingStep {
    /// Creates a step failing with a retryable error.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            permanent: false,
            calls: AtomicU32::new(0),
        }
    }

    /// Creates a step failing with a permanent error.
    #[must_use]
    pub fn permanent(error: impl Into<String>) -> Self {
        Self {
            permanent: true,
            ..Self::new(error)
        }
    }

    /// Returns the number of attempts made against this step.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for FailingStep {
    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        _inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.permanent {
            Err(StepError::permanent(&self.error))
        } else {
            Err(StepError::failed(&self.error))
        }
    }
}

/// A step that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyStep {
    failures: u32,
    value: Value,
    calls: AtomicU32,
}

impl FlakyStep {
    /// Creates a step that fails `failures` times before returning `value`.
    #[must_use]
    pub fn new(failures: u32, value: Value) -> Self {
        Self {
            failures,
            value,
            calls: AtomicU32::new(0),
        }
    }

    /// Returns the number of attempts made against this step.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepExecutor for FlakyStep {
    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        _inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(StepError::failed(format!("transient failure {call}")))
        } else {
            Ok(self.value.clone())
        }
    }
}

/// A step that sleeps before returning a value.
///
/// Tracks how many calls overlap so tests can observe the engine's
/// concurrency limit.
#[derive(Debug)]
pub struct SlowStep {
    delay: Duration,
    value: Value,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: AtomicUsize,
}

impl SlowStep {
    /// Creates a new slow step.
    #[must_use]
    pub fn new(delay: Duration, value: Value) -> Self {
        Self {
            delay,
            value,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            finished: AtomicUsize::new(0),
        }
    }

    /// Creates a slow step with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(ms: u64, value: Value) -> Self {
        Self::new(Duration::from_millis(ms), value)
    }

    /// Shares overlap counters with other slow steps.
    #[must_use]
    pub fn sharing_counters(mut self, other: &SlowStep) -> Self {
        self.active = Arc::clone(&other.active);
        self.peak = Arc::clone(&other.peak);
        self
    }

    /// Highest number of overlapping calls observed.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of calls that ran to completion.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Decrements the active counter even if the call is dropped mid-sleep.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StepExecutor for SlowStep {
    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        _inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(Arc::clone(&self.active));
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.clone())
    }
}

/// Shared, ordered log of executed node ids.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn push(&self, node_id: impl Into<String>) {
        self.entries.lock().push(node_id.into());
    }

    /// Returns all entries in execution order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the position of a node's first entry.
    #[must_use]
    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == node_id)
    }

    /// Returns true if the node was executed.
    #[must_use]
    pub fn contains(&self, node_id: &str) -> bool {
        self.position(node_id).is_some()
    }
}

/// A step that logs its execution and echoes its inputs.
///
/// The output is the inputs as a JSON object, which makes data flow along
/// edges directly observable in results.
#[derive(Debug)]
pub struct RecordingStep {
    log: ExecutionLog,
    received: Mutex<Vec<NodeInputs>>,
}

impl RecordingStep {
    /// Creates a recording step writing into `log`.
    #[must_use]
    pub fn new(log: ExecutionLog) -> Self {
        Self {
            log,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Returns every input set received, one per call.
    #[must_use]
    pub fn received(&self) -> Vec<NodeInputs> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl StepExecutor for RecordingStep {
    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        self.log.push(inputs.node_id());
        let output = inputs.to_json();
        self.received.lock().push(inputs);
        Ok(output)
    }
}
