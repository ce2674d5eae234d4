//! The scheduler.
//!
//! A run dispatches every node the moment its own upstream edges are
//! terminal (eager dispatch), drives node tasks through a `FuturesUnordered`
//! and is the only writer of node results. Node tasks report outcomes back;
//! a task that was cancelled or aborted can never write a result because the
//! coordinator only accepts outcomes from nodes it still considers in flight.

use super::{BackoffPolicy, FailureCollector, FailureRecord, GraphModel, Node, RetryDecision, Topology};
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::context::{ExecutionContext, NodeInputs};
use crate::core::{
    ExecutionTraceEntry, NodeResult, NodeStatus, PipelineResult, TraceStatus,
};
use crate::errors::{panic_message, StepError};
use crate::events::{EventDispatcher, EventSender, PipelineEvent, PipelineEventHandler};
use crate::observability::SpanTimer;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Executes a [`GraphModel`] against execution contexts.
///
/// The engine holds no per-run state; one engine may run many contexts
/// concurrently.
pub struct PipelineEngine {
    graph: GraphModel,
    config: EngineConfig,
    event_handler: Option<Arc<dyn PipelineEventHandler>>,
}

impl PipelineEngine {
    /// Creates an engine for a validated graph.
    #[must_use]
    pub fn new(graph: GraphModel) -> Self {
        Self {
            graph,
            config: EngineConfig::default(),
            event_handler: None,
        }
    }

    /// Sets the event handler.
    #[must_use]
    pub fn with_event_handler(mut self, handler: Arc<dyn PipelineEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    /// Returns the resolved topology.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        self.graph.topology()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.graph.name()
    }

    /// Runs the graph to completion.
    ///
    /// Node failures never surface as errors; they are reported in the
    /// returned [`PipelineResult`].
    ///
    /// `ctx` must be fresh. Results are write-once, so a context that already
    /// holds results from an earlier run keeps them and they show up in this
    /// run's outputs.
    pub async fn run(&self, ctx: Arc<ExecutionContext>) -> PipelineResult {
        let span = info_span!(
            "pipeline.run",
            pipeline = %self.graph.name(),
            correlation_id = %ctx.correlation_id()
        );
        if ctx.has_results() {
            warn!(
                pipeline = %self.graph.name(),
                completed = ?ctx.completed_nodes(),
                "Context already holds node results; runs need a fresh context"
            );
        }
        Run::new(self, ctx).execute().instrument(span).await
    }

    /// Runs the graph with a fresh context over `inputs`.
    pub async fn run_with_inputs(&self, inputs: Value) -> PipelineResult {
        self.run(Arc::new(ExecutionContext::new(inputs))).await
    }
}

impl fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("graph", &self.graph)
            .field("config", &self.config)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// What a node task reports back to the coordinator.
#[derive(Debug)]
enum NodeOutcome {
    Succeeded {
        output: Value,
        attempts: u32,
        latency_ms: f64,
    },
    Failed {
        error: String,
        attempts: u32,
        latency_ms: f64,
    },
    Cancelled,
}

type NodeJoin = BoxFuture<'static, (String, Result<NodeOutcome, JoinError>)>;

struct InFlight {
    abort: AbortHandle,
    timer: SpanTimer,
    dispatched_at: DateTime<Utc>,
}

/// State of one run. Owned by the coordinator; never shared with node tasks.
struct Run<'a> {
    engine: &'a PipelineEngine,
    graph: &'a GraphModel,
    ctx: Arc<ExecutionContext>,
    cancel: Arc<CancellationToken>,
    permits: Option<Arc<Semaphore>>,
    backoff: BackoffPolicy,
    events: EventDispatcher,
    statuses: HashMap<String, NodeStatus>,
    /// Incoming edges not yet terminal, per node.
    remaining: HashMap<String, usize>,
    ready: VecDeque<String>,
    in_flight: HashMap<String, InFlight>,
    tasks: FuturesUnordered<NodeJoin>,
    failures: FailureCollector,
    trace: Vec<ExecutionTraceEntry>,
    cancelled: Vec<String>,
}

impl<'a> Run<'a> {
    fn new(engine: &'a PipelineEngine, ctx: Arc<ExecutionContext>) -> Self {
        let graph = &engine.graph;
        let config = &engine.config;
        let mut backoff = BackoffPolicy::from_config(config);
        if !backoff.jitter_ratio.is_finite() || backoff.jitter_ratio < 0.0 {
            backoff.jitter_ratio = 0.0;
        }

        Self {
            engine,
            graph,
            ctx,
            cancel: Arc::new(CancellationToken::new()),
            permits: config
                .max_concurrency
                .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
            backoff,
            events: EventDispatcher::spawn(engine.event_handler.clone()),
            statuses: graph
                .nodes()
                .map(|n| (n.id.clone(), NodeStatus::Pending))
                .collect(),
            remaining: graph
                .nodes()
                .map(|n| (n.id.clone(), graph.predecessors(&n.id).len()))
                .collect(),
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            tasks: FuturesUnordered::new(),
            failures: FailureCollector::new(),
            trace: Vec::with_capacity(graph.node_count()),
            cancelled: Vec::new(),
        }
    }

    async fn execute(mut self) -> PipelineResult {
        let timer = SpanTimer::start(self.graph.name());
        debug!(
            nodes = self.graph.node_count(),
            levels = self.graph.topology().len(),
            "Starting pipeline run"
        );

        let graph = self.graph;
        self.ready
            .extend(graph.nodes().filter(|n| graph.is_root(&n.id)).map(|n| n.id.clone()));
        self.dispatch_ready();

        while let Some((node_id, joined)) = self.tasks.next().await {
            // Only nodes still in flight may settle.
            let Some(flight) = self.in_flight.remove(&node_id) else {
                continue;
            };
            let outcome = joined.unwrap_or_else(|e| NodeOutcome::Failed {
                error: format!("node task failed: {e}"),
                attempts: 1,
                latency_ms: flight.timer.elapsed_ms(),
            });

            self.settle(&node_id, outcome);
            if self.failures.should_abort() {
                self.abort();
                break;
            }
            self.dispatch_ready();
        }

        self.finish(timer).await
    }

    /// Dispatches, skips or gates every node in the ready queue.
    fn dispatch_ready(&mut self) {
        let graph = self.graph;
        while let Some(id) = self.ready.pop_front() {
            let Some(node) = graph.node(&id) else {
                error!(node = %id, "Ready node missing from graph");
                continue;
            };
            self.statuses.insert(id.clone(), NodeStatus::Ready);

            if let Some(upstream) = self.failures.blocked_by(&id).map(str::to_string) {
                let reason = format!("upstream node '{upstream}' failed");
                self.skip(&id, reason);
            } else if !self.condition_holds(node) {
                self.skip(&id, "condition not met".to_string());
            } else {
                self.spawn(node);
            }
        }
    }

    fn condition_holds(&self, node: &Node) -> bool {
        let Some(condition) = &node.condition else {
            return true;
        };
        let ctx: &ExecutionContext = &self.ctx;
        match std::panic::catch_unwind(AssertUnwindSafe(|| condition(ctx))) {
            Ok(holds) => holds,
            Err(_) => {
                warn!(node = %node.id, "Condition panicked; treating it as not met");
                false
            }
        }
    }

    fn resolve_inputs(&self, node: &Node) -> NodeInputs {
        if self.graph.is_root(&node.id) {
            return NodeInputs::single(&node.id, self.ctx.inputs().clone());
        }

        let mut inputs = NodeInputs::new(&node.id);
        for (edge, key) in self.graph.input_bindings(&node.id) {
            inputs.insert(key, edge.deliver(self.ctx.node_output(&edge.source)));
        }
        inputs
    }

    /// Starts a node task. The node counts as running from here on, though
    /// its `NodeStarted` event waits until it holds a concurrency permit.
    fn spawn(&mut self, node: &Node) {
        let inputs = self.resolve_inputs(node);
        let id = node.id.clone();

        self.statuses.insert(id.clone(), NodeStatus::Running);
        debug!(node = %id, inputs = inputs.len(), "Dispatching node");

        let task = NodeTask {
            node: node.clone(),
            ctx: Arc::clone(&self.ctx),
            inputs,
            cancel: Arc::clone(&self.cancel),
            permits: self.permits.clone(),
            backoff: self.backoff,
            events: self.events.sender(),
            pipeline: self.graph.name().to_string(),
        };
        let handle = tokio::spawn(task.run().instrument(info_span!("pipeline.node", node = %id)));

        self.in_flight.insert(
            id.clone(),
            InFlight {
                abort: handle.abort_handle(),
                timer: SpanTimer::start(id.clone()),
                dispatched_at: Utc::now(),
            },
        );
        self.tasks.push(async move { (id, handle.await) }.boxed());
    }

    fn settle(&mut self, id: &str, outcome: NodeOutcome) {
        let pipeline = self.graph.name().to_string();
        match outcome {
            NodeOutcome::Succeeded {
                output,
                attempts,
                latency_ms,
            } => {
                debug!(node = %id, attempts, latency_ms, "Node succeeded");
                self.record(NodeResult::succeeded(id, output, latency_ms, attempts));
                self.transition(id, NodeStatus::Succeeded, latency_ms);
                self.events.send(PipelineEvent::NodeCompleted {
                    node_id: id.to_string(),
                    pipeline,
                    latency_ms,
                });
            }
            NodeOutcome::Failed {
                error,
                attempts,
                latency_ms,
            } => {
                let strategy = self
                    .graph
                    .node(id)
                    .map(|n| n.failure_strategy)
                    .unwrap_or_default();
                warn!(node = %id, attempts, %strategy, error = %error, "Node failed");

                self.record(NodeResult::failed(id, error.clone(), latency_ms, attempts));
                self.transition(id, NodeStatus::Failed, latency_ms);
                self.events.send(PipelineEvent::NodeFailed {
                    node_id: id.to_string(),
                    pipeline,
                    error: error.clone(),
                });
                self.failures
                    .record(FailureRecord::new(id, error, strategy, attempts), self.graph);
            }
            NodeOutcome::Cancelled => {
                // Only an abort cancels the token, and an abort settles nothing.
                debug!(node = %id, "Discarding cancelled node outcome");
                return;
            }
        }

        if !self.failures.should_abort() {
            self.release_successors(id);
        }
    }

    fn skip(&mut self, id: &str, reason: String) {
        debug!(node = %id, reason = %reason, "Skipping node");
        self.record(NodeResult::skipped(id, reason.clone()));
        self.transition(id, NodeStatus::Skipped, 0.0);
        self.events.send(PipelineEvent::NodeSkipped {
            node_id: id.to_string(),
            pipeline: self.graph.name().to_string(),
            reason,
        });
        self.release_successors(id);
    }

    fn record(&self, result: NodeResult) {
        if let Err(e) = self.ctx.record_result(result) {
            error!(error = %e, "Dropping duplicate node result");
        }
    }

    fn transition(&mut self, id: &str, status: NodeStatus, duration_ms: f64) {
        self.statuses.insert(id.to_string(), status);
        self.trace
            .push(ExecutionTraceEntry::now(id, TraceStatus::from(status), duration_ms));
    }

    /// Marks one incoming edge of every successor as terminal.
    fn release_successors(&mut self, id: &str) {
        for succ in self.graph.successors(id) {
            if let Some(count) = self.remaining.get_mut(succ) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.ready.push_back(succ.to_string());
                }
            }
        }
    }

    /// Stops the run after a fail-pipeline failure.
    fn abort(&mut self) {
        let cause = self
            .failures
            .abort_cause()
            .map(|f| f.node_id.clone())
            .unwrap_or_default();
        self.cancel
            .cancel(format!("node '{cause}' failed with fail_pipeline strategy"));

        let graph = self.graph;
        let mut running: Vec<String> = self.in_flight.keys().cloned().collect();
        running.sort_by_key(|id| graph.position(id));
        for id in running {
            if let Some(flight) = self.in_flight.remove(&id) {
                flight.abort.abort();
                let entry = ExecutionTraceEntry::at(
                    &id,
                    TraceStatus::Started,
                    flight.dispatched_at,
                    flight.timer.elapsed_ms(),
                );
                let position = self
                    .trace
                    .partition_point(|e| e.timestamp <= flight.dispatched_at);
                self.trace.insert(position, entry);
                self.cancelled.push(id);
            }
        }
        self.ready.clear();

        warn!(
            node = %cause,
            cancelled = ?self.cancelled,
            "Pipeline aborted"
        );
    }

    async fn finish(self, timer: SpanTimer) -> PipelineResult {
        let graph = self.graph;
        let config = &self.engine.config;
        let outputs = self.ctx.results();
        let aborted = self.failures.should_abort();

        let pending_nodes: Vec<String> = graph
            .nodes()
            .filter(|n| {
                matches!(
                    self.statuses.get(&n.id),
                    Some(NodeStatus::Pending | NodeStatus::Ready)
                )
            })
            .map(|n| n.id.clone())
            .collect();

        let usage = if config.usage_tracking {
            self.ctx.usage().summary()
        } else {
            None
        };
        let success = self.failures.is_empty() && !aborted;
        let final_output = final_output(graph, &outputs);
        let failed_nodes = self.failures.failed_nodes();
        let total_duration_ms = timer.finish();

        self.events.send(PipelineEvent::PipelineCompleted {
            pipeline: graph.name().to_string(),
            success,
            duration_ms: total_duration_ms,
        });
        info!(
            success,
            aborted,
            duration_ms = total_duration_ms,
            failed = ?failed_nodes,
            "Pipeline completed"
        );
        self.events.finish(config.event_drain_timeout()).await;

        PipelineResult {
            pipeline_name: graph.name().to_string(),
            outputs,
            final_output,
            execution_trace: self.trace,
            total_duration_ms,
            success,
            failed_nodes,
            aborted,
            cancelled_nodes: self.cancelled,
            pending_nodes,
            usage,
        }
    }
}

/// Output of the succeeded sink, or an object keyed by sink id when several
/// sinks succeeded.
fn final_output(graph: &GraphModel, outputs: &HashMap<String, NodeResult>) -> Option<Value> {
    let produced: Vec<(&str, &Value)> = graph
        .terminal_nodes()
        .into_iter()
        .filter_map(|id| {
            outputs
                .get(id)
                .filter(|r| r.success)
                .and_then(|r| r.output.as_ref())
                .map(|output| (id, output))
        })
        .collect();

    match produced.as_slice() {
        [] => None,
        [(_, only)] => Some((*only).clone()),
        many => Some(Value::Object(
            many.iter()
                .map(|(id, output)| ((*id).to_string(), (*output).clone()))
                .collect(),
        )),
    }
}

/// Everything a node task needs, owned so it can run on its own task.
struct NodeTask {
    node: Node,
    ctx: Arc<ExecutionContext>,
    inputs: NodeInputs,
    cancel: Arc<CancellationToken>,
    permits: Option<Arc<Semaphore>>,
    backoff: BackoffPolicy,
    events: EventSender,
    pipeline: String,
}

impl NodeTask {
    async fn run(self) -> NodeOutcome {
        let max_attempts = self.node.max_attempts();
        // Started on the first permit, so latency excludes queueing.
        let mut timer = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return NodeOutcome::Cancelled,
                result = self.attempt(&mut timer) => result,
            };
            let latency_ms = timer.as_ref().map_or(0.0, SpanTimer::elapsed_ms);

            let error = match result {
                Ok(output) => {
                    return NodeOutcome::Succeeded {
                        output,
                        attempts: attempt,
                        latency_ms,
                    }
                }
                Err(e) => e,
            };

            match self
                .backoff
                .decide(attempt, max_attempts, self.node.backoff_factor, &error)
            {
                RetryDecision::Retry(delay) => {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Attempt failed; retrying"
                    );
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return NodeOutcome::Cancelled,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    return NodeOutcome::Failed {
                        error: error.to_string(),
                        attempts: attempt,
                        latency_ms,
                    };
                }
            }
        }
    }

    /// One attempt: holds a concurrency permit only while the executor runs.
    async fn attempt(&self, timer: &mut Option<SpanTimer>) -> Result<Value, StepError> {
        let _permit = match &self.permits {
            Some(permits) => Some(
                Arc::clone(permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| StepError::failed("concurrency limiter closed"))?,
            ),
            None => None,
        };

        if timer.is_none() {
            *timer = Some(SpanTimer::start(self.node.id.clone()));
            if !self.cancel.is_cancelled() {
                self.events.send(PipelineEvent::NodeStarted {
                    node_id: self.node.id.clone(),
                    pipeline: self.pipeline.clone(),
                });
            }
        }

        let call = AssertUnwindSafe(
            self.node
                .executor
                .execute(Arc::clone(&self.ctx), self.inputs.clone()),
        )
        .catch_unwind();

        let result = match self.node.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => return Err(StepError::Timeout(limit)),
            },
            None => call.await,
        };

        result.unwrap_or_else(|panic| {
            Err(StepError::failed(format!(
                "executor panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }
}
