//! Step executor trait and implementations.
//!
//! A step executor is the unit of work a node wraps. The engine only ever
//! calls [`StepExecutor::execute`]; it never inspects which kind of step it
//! is running.

mod agent;
mod routing;

pub use agent::{Agent, AgentResponse, AgentStep, BatchStep, ReasoningPattern, ReasoningStep};
pub use routing::{route_is, BranchStep, FanInStep, FanOutStep};

use crate::context::{ExecutionContext, NodeInputs};
use crate::errors::StepError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Trait for anything that can serve as a node's unit of work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Executes one attempt.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The run's execution context
    /// * `inputs` - Values resolved from the node's incoming edges
    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError>;
}

/// A step backed by a synchronous function of the node inputs.
pub struct FnStep<F>
where
    F: Fn(&NodeInputs) -> Result<Value, StepError> + Send + Sync,
{
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&NodeInputs) -> Result<Value, StepError> + Send + Sync,
{
    /// Creates a new function-based step.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnStep<F>
where
    F: Fn(&NodeInputs) -> Result<Value, StepError> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> StepExecutor for FnStep<F>
where
    F: Fn(&NodeInputs) -> Result<Value, StepError> + Send + Sync,
{
    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        (self.func)(&inputs)
    }
}

/// A step backed by an async function of the context and inputs.
pub struct AsyncFnStep<F> {
    func: F,
}

impl<F, Fut> AsyncFnStep<F>
where
    F: Fn(Arc<ExecutionContext>, NodeInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    /// Creates a new async function-based step.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for AsyncFnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFnStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> StepExecutor for AsyncFnStep<F>
where
    F: Fn(Arc<ExecutionContext>, NodeInputs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        (self.func)(ctx, inputs).await
    }
}
