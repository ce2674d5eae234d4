//! Branching, fan-out and fan-in steps.

use super::StepExecutor;
use crate::context::{ExecutionContext, NodeInputs};
use crate::errors::StepError;
use crate::pipeline::Condition;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Routes execution by emitting a route key.
///
/// Downstream nodes gate on the key through their conditions, see
/// [`route_is`].
pub struct BranchStep {
    router: Box<dyn Fn(&NodeInputs) -> String + Send + Sync>,
}

impl BranchStep {
    /// Creates a branch step from a router function.
    pub fn new<F>(router: F) -> Self
    where
        F: Fn(&NodeInputs) -> String + Send + Sync + 'static,
    {
        Self {
            router: Box::new(router),
        }
    }
}

impl fmt::Debug for BranchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for BranchStep {
    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        Ok(Value::String((self.router)(&inputs)))
    }
}

/// Builds a condition that holds when `branch_node` succeeded with route `key`.
#[must_use]
pub fn route_is(branch_node: impl Into<String>, key: impl Into<String>) -> Condition {
    let branch_node = branch_node.into();
    let key = key.into();
    Arc::new(move |ctx: &ExecutionContext| {
        ctx.node_output(&branch_node)
            .is_some_and(|route| route.as_str() == Some(key.as_str()))
    })
}

/// Splits its input into a composite value (a list or a keyed map).
///
/// The number of workers consuming the parts is fixed by the graph; each
/// worker edge selects one element with an output selector.
pub struct FanOutStep {
    split: Box<dyn Fn(&Value) -> Value + Send + Sync>,
}

impl FanOutStep {
    /// Creates a fan-out step from a split function.
    pub fn new<F>(split: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            split: Box::new(split),
        }
    }
}

impl fmt::Debug for FanOutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for FanOutStep {
    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        let input = inputs.input().unwrap_or_else(|| ctx.inputs());
        Ok((self.split)(input))
    }
}

type MergeFn = Box<dyn Fn(Map<String, Value>) -> Value + Send + Sync>;

/// Merges the values of all incoming edges.
///
/// By default the output is an object keyed by input key, with `null` for
/// absent inputs.
#[derive(Default)]
pub struct FanInStep {
    merge: Option<MergeFn>,
}

impl FanInStep {
    /// Creates a fan-in step producing the keyed object.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fan-in step with a custom merge function.
    pub fn with_merge<F>(merge: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Value + Send + Sync + 'static,
    {
        Self {
            merge: Some(Box::new(merge)),
        }
    }
}

impl fmt::Debug for FanInStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanInStep")
            .field("custom_merge", &self.merge.is_some())
            .finish()
    }
}

#[async_trait]
impl StepExecutor for FanInStep {
    async fn execute(
        &self,
        _ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        let merged = match inputs.to_json() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(match &self.merge {
            Some(merge) => merge(merged),
            None => Value::Object(merged),
        })
    }
}
