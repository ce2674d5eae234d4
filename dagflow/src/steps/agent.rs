//! Agent-backed steps.
//!
//! These wrap an [`Agent`] (anything that turns a prompt into a response) as
//! a node executor. The engine itself never talks to a model; agents report
//! token usage back through the context.

use super::StepExecutor;
use crate::context::{ExecutionContext, NodeInputs, DEFAULT_INPUT_KEY};
use crate::core::UsageRecord;
use crate::errors::{panic_message, StepError};
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

/// Default number of items processed concurrently by a [`BatchStep`].
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Response from a single agent call.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    /// The agent's output.
    pub output: Value,
    /// Usage reported for the call, if any.
    pub usage: Option<UsageRecord>,
}

impl AgentResponse {
    /// Creates a response without usage.
    #[must_use]
    pub fn new(output: Value) -> Self {
        Self {
            output,
            usage: None,
        }
    }

    /// Attaches usage to the response.
    #[must_use]
    pub fn with_usage(mut self, usage: UsageRecord) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Something that answers prompts, typically a language model client.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Name used in usage records and logs.
    fn name(&self) -> &str;

    /// Answers a prompt.
    async fn run(&self, prompt: Value, ctx: &ExecutionContext) -> Result<AgentResponse, StepError>;
}

fn record_response_usage(agent: &dyn Agent, ctx: &ExecutionContext, usage: Option<UsageRecord>) {
    if let Some(mut usage) = usage {
        if usage.agent.is_empty() {
            usage.agent = agent.name().to_string();
        }
        ctx.record_usage(usage);
    }
}

/// Runs an agent on a single prompt taken from the node inputs.
pub struct AgentStep {
    agent: Arc<dyn Agent>,
    prompt_key: String,
}

impl AgentStep {
    /// Creates a step reading its prompt from the default input key.
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            prompt_key: DEFAULT_INPUT_KEY.to_string(),
        }
    }

    /// Reads the prompt from a different input key.
    #[must_use]
    pub fn with_prompt_key(mut self, key: impl Into<String>) -> Self {
        self.prompt_key = key.into();
        self
    }
}

impl std::fmt::Debug for AgentStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStep")
            .field("agent", &self.agent.name())
            .field("prompt_key", &self.prompt_key)
            .finish()
    }
}

#[async_trait]
impl StepExecutor for AgentStep {
    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        // Absent prompt falls back to the run payload.
        let prompt = inputs
            .get(&self.prompt_key)
            .cloned()
            .unwrap_or_else(|| ctx.inputs().clone());

        let response = self.agent.run(prompt, &ctx).await?;
        record_response_usage(self.agent.as_ref(), &ctx, response.usage);
        Ok(response.output)
    }
}

/// A multi-call reasoning strategy driving an agent (e.g. self-critique).
#[async_trait]
pub trait ReasoningPattern: Send + Sync {
    /// Pattern name for logs.
    fn name(&self) -> &str;

    /// Runs the pattern against `agent` for one input.
    async fn execute(
        &self,
        agent: &dyn Agent,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, StepError>;
}

/// Runs a reasoning pattern with an agent.
pub struct ReasoningStep {
    pattern: Arc<dyn ReasoningPattern>,
    agent: Arc<dyn Agent>,
    input_key: String,
}

impl ReasoningStep {
    /// Creates a reasoning step.
    pub fn new(pattern: Arc<dyn ReasoningPattern>, agent: Arc<dyn Agent>) -> Self {
        Self {
            pattern,
            agent,
            input_key: DEFAULT_INPUT_KEY.to_string(),
        }
    }

    /// Reads the input from a different key.
    #[must_use]
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self
    }
}

impl std::fmt::Debug for ReasoningStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReasoningStep")
            .field("pattern", &self.pattern.name())
            .field("agent", &self.agent.name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StepExecutor for ReasoningStep {
    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        let input = inputs
            .get(&self.input_key)
            .cloned()
            .unwrap_or_else(|| ctx.inputs().clone());

        debug!(
            pattern = self.pattern.name(),
            agent = self.agent.name(),
            "Running reasoning pattern"
        );
        self.pattern.execute(self.agent.as_ref(), input, &ctx).await
    }
}

/// Runs an agent over a list of items in bounded concurrent chunks.
///
/// Per-item failures do not fail the step; they are reported in place as
/// `{"error": "<message>"}`. The output list preserves input order.
pub struct BatchStep {
    agent: Arc<dyn Agent>,
    items_key: String,
    batch_size: usize,
}

impl BatchStep {
    /// Creates a batch step reading items from the default input key.
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            items_key: DEFAULT_INPUT_KEY.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Reads items from a different key.
    #[must_use]
    pub fn with_items_key(mut self, key: impl Into<String>) -> Self {
        self.items_key = key.into();
        self
    }

    /// Sets the chunk size. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Resolves the item list: node inputs first, then a recorded upstream
    /// output of that name, then the run payload.
    fn items(&self, ctx: &ExecutionContext, inputs: &NodeInputs) -> Vec<Value> {
        let source = inputs
            .get(&self.items_key)
            .cloned()
            .or_else(|| ctx.node_output(&self.items_key))
            .or_else(|| ctx.inputs().get(&self.items_key).cloned());

        match source {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![single],
        }
    }
}

impl std::fmt::Debug for BatchStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStep")
            .field("agent", &self.agent.name())
            .field("items_key", &self.items_key)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

#[async_trait]
impl StepExecutor for BatchStep {
    async fn execute(
        &self,
        ctx: Arc<ExecutionContext>,
        inputs: NodeInputs,
    ) -> Result<Value, StepError> {
        let items = self.items(&ctx, &inputs);
        let mut outputs = Vec::with_capacity(items.len());

        for chunk in items.chunks(self.batch_size) {
            let calls = chunk.iter().map(|item| {
                AssertUnwindSafe(self.agent.run(item.clone(), &ctx)).catch_unwind()
            });
            for response in join_all(calls).await {
                match response {
                    Ok(Ok(response)) => {
                        record_response_usage(self.agent.as_ref(), &ctx, response.usage);
                        outputs.push(response.output);
                    }
                    Ok(Err(e)) => outputs.push(json!({ "error": e.to_string() })),
                    Err(panic) => outputs.push(json!({
                        "error": format!("agent panicked: {}", panic_message(panic.as_ref()))
                    })),
                }
            }
        }

        debug!(
            agent = self.agent.name(),
            items = outputs.len(),
            "Batch complete"
        );
        Ok(Value::Array(outputs))
    }
}
