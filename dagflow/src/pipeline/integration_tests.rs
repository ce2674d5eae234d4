//! End-to-end tests for pipeline execution.

use crate::config::EngineConfig;
use crate::context::{ExecutionContext, NodeInputs};
use crate::core::{NodeStatus, TraceStatus, UsageRecord};
use crate::errors::{codes, StepError};
use crate::events::{CollectingEventHandler, PipelineEvent, PipelineEventHandler};
use crate::pipeline::{Edge, FailureStrategy, GraphModel, Node, PipelineBuilder};
use crate::steps::{
    route_is, Agent, AgentResponse, AgentStep, AsyncFnStep, BranchStep, FanInStep, FanOutStep,
    FnStep, MockStepExecutor, StepExecutor,
};
use crate::testing::{
    assert_node_absent, assert_node_failed, assert_node_skipped, assert_node_succeeded,
    assert_ran_before, ExecutionLog, FailingStep, FlakyStep, RecordingStep, SlowStep, ValueStep,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn value(v: Value) -> Arc<ValueStep> {
    Arc::new(ValueStep::new(v))
}

/// Fast retries without jitter.
fn quick_config() -> EngineConfig {
    EngineConfig::default().with_jitter_ratio(0.0)
}

fn sleepy(ms: u64, output: Value) -> Arc<dyn StepExecutor> {
    Arc::new(AsyncFnStep::new(move |_ctx, _inputs| {
        let output = output.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(output)
        }
    }))
}

#[tokio::test]
async fn test_linear_chain_end_to_end() {
    let engine = PipelineBuilder::new("linear")
        .step("a", value(json!(1)))
        .step("b", value(json!(2)))
        .step("c", value(json!(3)))
        .chain(&["a", "b", "c"])
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!({})).await;

    assert!(result.success);
    assert_eq!(result.pipeline_name, "linear");
    assert_eq!(result.final_output, Some(json!(3)));
    assert_eq!(result.execution_trace.len(), 3);
    assert!(result
        .execution_trace
        .iter()
        .all(|e| e.status == TraceStatus::Completed));
    assert!(result.failed_nodes.is_empty());
    assert!(!result.aborted);
    assert_eq!(result.succeeded_nodes(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_cycle_rejected_before_any_executor_runs() {
    let mut never = MockStepExecutor::new();
    never.expect_execute().times(0);
    let never: Arc<dyn StepExecutor> = Arc::new(never);

    let err = PipelineBuilder::new("cyclic")
        .step("a", Arc::clone(&never))
        .step("b", Arc::clone(&never))
        .step("c", never)
        .chain(&["a", "b", "c", "a"])
        .build()
        .unwrap_err();

    assert_eq!(err.code(), Some(codes::CYCLE));
    assert_eq!(err.nodes, vec!["a", "b", "c", "a"]);
}

#[tokio::test]
async fn test_cycle_rejection_is_deterministic() {
    let build = || {
        GraphModel::new(
            "cyclic",
            vec![
                Node::new("x", value(json!(0))),
                Node::new("y", value(json!(0))),
            ],
            vec![Edge::new("x", "y"), Edge::new("y", "x")],
        )
        .unwrap_err()
    };

    let first = build();
    for _ in 0..5 {
        assert_eq!(build().nodes, first.nodes);
    }
}

#[tokio::test]
async fn test_upstream_is_terminal_before_downstream_starts() {
    // Each step fails unless every predecessor already has a result.
    fn checking(preds: &'static [&'static str]) -> Arc<dyn StepExecutor> {
        Arc::new(AsyncFnStep::new(move |ctx: Arc<ExecutionContext>, _inputs| async move {
            for pred in preds {
                if ctx.node_result(pred).is_none() {
                    return Err(StepError::permanent(format!("{pred} not terminal")));
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(json!(true))
        }))
    }

    let engine = PipelineBuilder::new("diamond")
        .step("a", checking(&[]))
        .step("b", checking(&["a"]))
        .step("c", checking(&["a"]))
        .step("d", checking(&["b", "c"]))
        .add_edge("a", "b")
        .add_edge("a", "c")
        .add_edge_with(Edge::new("b", "d").with_input_key("b"))
        .add_edge_with(Edge::new("c", "d").with_input_key("c"))
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;
    assert!(result.success, "failed: {:?}", result.failed_nodes);
}

#[tokio::test]
async fn test_execution_order_follows_edges() {
    let log = ExecutionLog::new();
    let rec = |log: &ExecutionLog| Arc::new(RecordingStep::new(log.clone()));

    let engine = PipelineBuilder::new("ordered")
        .step("load", rec(&log))
        .step("parse", rec(&log))
        .step("index", rec(&log))
        .step("report", rec(&log))
        .add_edge("load", "parse")
        .add_edge("load", "index")
        .add_edge_with(Edge::new("index", "report").with_input_key("index"))
        .add_edge_with(Edge::new("parse", "report").with_input_key("parse"))
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!("doc")).await;

    assert!(result.success);
    assert_ran_before(&log, "load", "parse");
    assert_ran_before(&log, "load", "index");
    assert_ran_before(&log, "parse", "report");
    assert_ran_before(&log, "index", "report");
    assert_eq!(
        result.output_of("report"),
        Some(&json!({
            "index": {"input": {"input": "doc"}},
            "parse": {"input": {"input": "doc"}}
        }))
    );
}

#[tokio::test]
async fn test_exactly_one_result_per_node() {
    let engine = PipelineBuilder::new("mixed")
        .step("ok", value(json!(1)))
        .add_node(Node::new("bad", Arc::new(FailingStep::permanent("nope"))))
        .step("after_bad", value(json!(2)))
        .add_node(Node::new("gated", value(json!(3))).when(|_| false))
        .step("after_gated", value(json!(4)))
        .add_edge("bad", "after_bad")
        .add_edge("gated", "after_gated")
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert_eq!(result.outputs.len(), engine.graph().node_count());
    assert_eq!(result.execution_trace.len(), engine.graph().node_count());
    for node in engine.graph().nodes() {
        let entries = result
            .execution_trace
            .iter()
            .filter(|e| e.node_id == node.id)
            .count();
        assert_eq!(entries, 1, "node {}", node.id);
    }
}

#[tokio::test]
async fn test_retry_bound() {
    let failing = Arc::new(FailingStep::new("flaky backend"));
    let engine = PipelineBuilder::new("retry")
        .add_node(
            Node::new("call", failing.clone())
                .with_retry_max(2)
                .with_backoff_factor(0.001),
        )
        .with_config(quick_config())
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert!(!result.success);
    assert_eq!(failing.calls(), 3);
    let node = result.node("call").unwrap();
    assert_eq!(node.attempts, 3);
    assert_eq!(node.error.as_deref(), Some("flaky backend"));
}

#[tokio::test]
async fn test_retry_recovers() {
    let flaky = Arc::new(FlakyStep::new(2, json!("ok")));
    let engine = PipelineBuilder::new("retry")
        .add_node(
            Node::new("call", flaky.clone())
                .with_retry_max(3)
                .with_backoff_factor(0.001),
        )
        .with_config(quick_config())
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert!(result.success);
    assert_eq!(flaky.calls(), 3);
    assert_eq!(result.node("call").unwrap().attempts, 3);
    assert_eq!(result.final_output, Some(json!("ok")));
}

#[tokio::test]
async fn test_permanent_errors_are_not_retried() {
    let failing = Arc::new(FailingStep::permanent("invalid request"));
    let engine = PipelineBuilder::new("retry")
        .add_node(
            Node::new("call", failing.clone())
                .with_retry_max(5)
                .with_backoff_factor(0.001),
        )
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert_eq!(failing.calls(), 1);
    assert_eq!(result.node("call").unwrap().attempts, 1);
}

#[tokio::test]
async fn test_skip_downstream_isolates_failure() {
    let c = Arc::new(ValueStep::new(json!(3)));
    let engine = PipelineBuilder::new("skip")
        .step("a", value(json!(1)))
        .add_node(Node::new("b", Arc::new(FailingStep::permanent("boom"))))
        .step("c", c.clone())
        .chain(&["a", "b", "c"])
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert_node_succeeded(&result, "a");
    assert_node_failed(&result, "b");
    assert_node_skipped(&result, "c");
    assert_eq!(c.calls(), 0);
    assert_eq!(result.failed_nodes, vec!["b"]);
    assert!(!result.success);
    assert_eq!(
        result.node("c").unwrap().skip_reason.as_deref(),
        Some("upstream node 'b' failed")
    );
}

#[tokio::test]
async fn test_skip_downstream_is_transitive_and_spares_siblings() {
    let engine = PipelineBuilder::new("skip")
        .add_node(Node::new("b", Arc::new(FailingStep::permanent("boom"))))
        .step("c", value(json!(3)))
        .step("d", value(json!(4)))
        .step("side", value(json!(5)))
        .chain(&["b", "c", "d"])
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert_node_skipped(&result, "c");
    assert_node_skipped(&result, "d");
    assert_node_succeeded(&result, "side");
    assert_eq!(
        result.node("d").unwrap().skip_reason.as_deref(),
        Some("upstream node 'b' failed")
    );
}

#[tokio::test]
async fn test_propagate_delivers_absent_input() {
    let log = ExecutionLog::new();
    let c = Arc::new(RecordingStep::new(log.clone()));
    let engine = PipelineBuilder::new("propagate")
        .step("a", value(json!(1)))
        .add_node(
            Node::new("b", Arc::new(FailingStep::permanent("boom")))
                .with_failure_strategy(FailureStrategy::Propagate),
        )
        .step("c", c.clone())
        .chain(&["a", "b", "c"])
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert_node_failed(&result, "b");
    assert_node_succeeded(&result, "c");
    assert!(!result.success);
    assert_eq!(result.failed_nodes, vec!["b"]);

    let received = c.received();
    assert_eq!(received.len(), 1);
    assert!(received[0].is_absent("input"));
    assert_eq!(result.output_of("c"), Some(&json!({"input": null})));
}

#[tokio::test]
async fn test_propagate_mixed_upstreams_are_independent() {
    let log = ExecutionLog::new();
    let merge = Arc::new(RecordingStep::new(log));
    let engine = PipelineBuilder::new("propagate")
        .step("good", value(json!("g")))
        .add_node(
            Node::new("bad", Arc::new(FailingStep::permanent("boom")))
                .with_failure_strategy(FailureStrategy::Propagate),
        )
        .step("merge", merge.clone())
        .add_edge_with(Edge::new("good", "merge").with_input_key("good"))
        .add_edge_with(Edge::new("bad", "merge").with_input_key("bad"))
        .build()
        .unwrap();

    engine.run_with_inputs(json!(null)).await;

    let inputs = &merge.received()[0];
    assert_eq!(inputs.get("good"), Some(&json!("g")));
    assert!(inputs.is_absent("bad"));
}

#[tokio::test]
async fn test_fail_pipeline_aborts_run() {
    let slow = Arc::new(SlowStep::with_delay_ms(500, json!("late")));
    let d = Arc::new(ValueStep::new(json!("d")));
    let engine = PipelineBuilder::new("abort")
        .step("a", value(json!(1)))
        .add_node(
            Node::new("b", Arc::new(FailingStep::permanent("fatal")))
                .with_failure_strategy(FailureStrategy::FailPipeline),
        )
        .step("after_b", value(json!(2)))
        .step("slow", slow.clone())
        .step("d", d.clone())
        .chain(&["a", "b", "after_b"])
        .add_edge("slow", "d")
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let result = engine.run_with_inputs(json!(null)).await;

    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(!result.success);
    assert!(result.aborted);
    assert_eq!(result.failed_nodes, vec!["b"]);
    assert_eq!(result.cancelled_nodes, vec!["slow"]);
    assert_eq!(result.pending_nodes, vec!["after_b", "d"]);

    assert_eq!(d.calls(), 0);
    assert_node_absent(&result, "d");
    assert_node_absent(&result, "slow");
    assert_node_absent(&result, "after_b");
    assert!(result.final_output.is_none());

    let slow_entry = result
        .execution_trace
        .iter()
        .find(|e| e.node_id == "slow")
        .unwrap();
    assert_eq!(slow_entry.status, TraceStatus::Started);

    // Stamped at dispatch, so it sits before b's failure in the trace.
    let position = |id: &str| {
        result
            .execution_trace
            .iter()
            .position(|e| e.node_id == id)
            .unwrap()
    };
    let failed_entry = &result.execution_trace[position("b")];
    assert!(slow_entry.timestamp <= failed_entry.timestamp);
    assert!(position("slow") < position("b"));

    // The cancelled attempt never completes and never writes a result.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(slow.finished(), 0);
}

#[tokio::test]
async fn test_condition_false_skips_without_blocking_downstream() {
    let gated = Arc::new(ValueStep::new(json!("never")));
    let log = ExecutionLog::new();
    let after = Arc::new(RecordingStep::new(log.clone()));

    let engine = PipelineBuilder::new("gated")
        .add_node(Node::new("gated", gated.clone()).when(|ctx| ctx.inputs()["enabled"] == true))
        .step("after", after.clone())
        .add_edge("gated", "after")
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!({"enabled": false})).await;

    assert!(result.success);
    assert_eq!(gated.calls(), 0);
    assert_node_skipped(&result, "gated");
    assert_eq!(
        result.node("gated").unwrap().skip_reason.as_deref(),
        Some("condition not met")
    );
    assert_eq!(result.node("gated").unwrap().attempts, 0);
    assert_node_succeeded(&result, "after");
    assert!(after.received()[0].is_absent("input"));

    let result = engine.run_with_inputs(json!({"enabled": true})).await;
    assert_node_succeeded(&result, "gated");
    assert_eq!(gated.calls(), 1);
}

#[tokio::test]
async fn test_panicking_condition_is_treated_as_false() {
    let engine = PipelineBuilder::new("gated")
        .add_node(Node::new("gated", value(json!(1))).when(|_| panic!("bad predicate")))
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert!(result.success);
    assert_node_skipped(&result, "gated");
}

#[tokio::test]
async fn test_branch_routing() {
    let left = Arc::new(ValueStep::new(json!("left ran")));
    let right = Arc::new(ValueStep::new(json!("right ran")));

    let engine = PipelineBuilder::new("branch")
        .step(
            "route",
            Arc::new(BranchStep::new(|inputs: &NodeInputs| {
                let n = inputs.input().and_then(Value::as_i64).unwrap_or(0);
                if n < 0 { "left" } else { "right" }.to_string()
            })),
        )
        .add_node(Node::new("left", left.clone()).with_condition(route_is("route", "left")))
        .add_node(Node::new("right", right.clone()).with_condition(route_is("route", "right")))
        .add_edge("route", "left")
        .add_edge("route", "right")
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(-3)).await;

    assert!(result.success);
    assert_eq!(result.output_of("route"), Some(&json!("left")));
    assert_node_succeeded(&result, "left");
    assert_node_skipped(&result, "right");
    assert_eq!(result.final_output, Some(json!("left ran")));
    assert_eq!(right.calls(), 0);
}

#[tokio::test]
async fn test_fan_out_fan_in_aggregation() {
    let double = |inputs: &NodeInputs| -> Result<Value, StepError> {
        let n = inputs.input().and_then(Value::as_i64).unwrap_or(0);
        Ok(json!(n * 10))
    };

    for slow_worker in ["worker_a", "worker_b"] {
        let delayed = |id: &str| -> Arc<dyn StepExecutor> {
            let delay = if id == slow_worker { 30 } else { 0 };
            Arc::new(AsyncFnStep::new(move |_ctx, inputs: NodeInputs| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                double(&inputs)
            }))
        };

        let engine = PipelineBuilder::new("fan")
            .step("split", Arc::new(FanOutStep::new(|input| input.clone())))
            .step("worker_a", delayed("worker_a"))
            .step("worker_b", delayed("worker_b"))
            .step("merge", Arc::new(FanInStep::new()))
            .add_edge_with(Edge::new("split", "worker_a").with_output_key("a"))
            .add_edge_with(Edge::new("split", "worker_b").with_output_key("b"))
            .add_edge_with(Edge::new("worker_a", "merge").with_input_key("a"))
            .add_edge_with(Edge::new("worker_b", "merge").with_input_key("b"))
            .build()
            .unwrap();

        let result = engine.run_with_inputs(json!({"a": 1, "b": 2})).await;

        assert!(result.success);
        assert_eq!(result.final_output, Some(json!({"a": 10, "b": 20})));
    }
}

#[tokio::test]
async fn test_fan_out_by_index() {
    let engine = PipelineBuilder::new("fan")
        .step("split", Arc::new(FanOutStep::new(|_| json!(["x", "y"]))))
        .step("first", Arc::new(FnStep::new(|i: &NodeInputs| Ok(i.input().cloned().unwrap_or(Value::Null)))))
        .step("third", Arc::new(FnStep::new(|i: &NodeInputs| Ok(json!(i.is_absent("input"))))))
        .add_edge_with(Edge::new("split", "first").with_output_index(0))
        .add_edge_with(Edge::new("split", "third").with_output_index(2))
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert_eq!(result.output_of("first"), Some(&json!("x")));
    assert_eq!(result.output_of("third"), Some(&json!(true)));
    assert_eq!(
        result.final_output,
        Some(json!({"first": "x", "third": true}))
    );
}

#[tokio::test]
async fn test_timeout_counts_as_failed_attempt() {
    let slow = Arc::new(SlowStep::with_delay_ms(300, json!("too late")));
    let engine = PipelineBuilder::new("timeout")
        .add_node(
            Node::new("slow", slow.clone())
                .with_timeout(Duration::from_millis(20))
                .with_retry_max(1)
                .with_backoff_factor(0.001),
        )
        .with_config(quick_config())
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let result = engine.run_with_inputs(json!(null)).await;

    assert!(started.elapsed() < Duration::from_millis(250));
    assert_node_failed(&result, "slow");
    let node = result.node("slow").unwrap();
    assert_eq!(node.attempts, 2);
    assert!(node.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(slow.finished(), 0);
}

#[tokio::test]
async fn test_backoff_does_not_block_siblings() {
    let engine = PipelineBuilder::new("backoff")
        .add_node(
            Node::new("retrying", Arc::new(FailingStep::new("down")))
                .with_retry_max(1)
                .with_backoff_factor(0.2),
        )
        .step("fast", value(json!("f")))
        .step("after_fast", value(json!("af")))
        .add_edge("fast", "after_fast")
        .with_config(quick_config())
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    let completed = |id: &str| {
        result
            .execution_trace
            .iter()
            .position(|e| e.node_id == id)
            .unwrap()
    };
    assert!(completed("after_fast") < completed("retrying"));
}

#[tokio::test]
async fn test_eager_dispatch_does_not_wait_for_level() {
    let engine = PipelineBuilder::new("eager")
        .step("slow", sleepy(150, json!("s")))
        .step("fast", value(json!("f")))
        .step("after_fast", sleepy(10, json!("af")))
        .step("after_slow", value(json!("as")))
        .add_edge("fast", "after_fast")
        .add_edge("slow", "after_slow")
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    let order: Vec<&str> = result
        .execution_trace
        .iter()
        .map(|e| e.node_id.as_str())
        .collect();
    assert_eq!(order, vec!["fast", "after_fast", "slow", "after_slow"]);
}

#[tokio::test]
async fn test_executor_panic_is_a_failed_attempt() {
    let step = AsyncFnStep::new(|_ctx, _inputs| async move {
        if true {
            panic!("executor bug");
        }
        Ok(json!(null))
    });
    let engine = PipelineBuilder::new("panic")
        .add_node(Node::new("boom", Arc::new(step)))
        .step("after", value(json!(1)))
        .add_edge("boom", "after")
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert_node_failed(&result, "boom");
    assert!(result
        .node("boom")
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("executor panicked: executor bug"));
    assert_node_skipped(&result, "after");
}

#[tokio::test]
async fn test_max_concurrency_limits_attempts() {
    let probe = SlowStep::with_delay_ms(30, json!(0));
    let mut builder = PipelineBuilder::new("limited")
        .with_config(EngineConfig::default().with_max_concurrency(2));
    let mut steps = Vec::new();
    for i in 0..6 {
        let step = Arc::new(SlowStep::with_delay_ms(30, json!(i)).sharing_counters(&probe));
        builder = builder.step(format!("n{i}"), step.clone());
        steps.push(step);
    }
    let engine = builder.build().unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert!(result.success);
    assert!(probe.peak_concurrency() <= 2);
    assert_eq!(steps.iter().map(|s| s.finished()).sum::<usize>(), 6);
}

#[tokio::test]
async fn test_unlimited_concurrency_runs_roots_together() {
    let probe = SlowStep::with_delay_ms(50, json!(0));
    let mut builder = PipelineBuilder::new("unlimited");
    for i in 0..4 {
        builder = builder.step(
            format!("n{i}"),
            Arc::new(SlowStep::with_delay_ms(50, json!(i)).sharing_counters(&probe)),
        );
    }

    builder.build().unwrap().run_with_inputs(json!(null)).await;

    assert_eq!(probe.peak_concurrency(), 4);
}

#[tokio::test]
async fn test_queued_node_starts_when_it_gets_a_permit() {
    let handler = Arc::new(CollectingEventHandler::new());
    let engine = Arc::new(
        PipelineBuilder::new("queued")
            .step("first", sleepy(150, json!(1)))
            .step("second", sleepy(150, json!(2)))
            .with_config(EngineConfig::default().with_max_concurrency(1))
            .with_event_handler(handler.clone())
            .build()
            .unwrap(),
    );

    let run = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run_with_inputs(json!(null)).await }
    });

    tokio::time::sleep(Duration::from_millis(75)).await;
    assert_eq!(handler.events_of_type("node.started").len(), 1);

    let result = run.await.unwrap();
    assert!(result.success);
    assert_eq!(handler.events_of_type("node.started").len(), 2);
    for id in ["first", "second"] {
        let latency = result.node(id).unwrap().latency_ms;
        assert!(latency < 280.0, "{id} latency {latency} includes queueing");
    }
}

#[tokio::test]
async fn test_used_context_is_detectable() {
    let engine = PipelineBuilder::new("once")
        .step("a", value(json!(1)))
        .build()
        .unwrap();
    let ctx = Arc::new(ExecutionContext::new(json!(null)));
    assert!(!ctx.has_results());

    let result = engine.run(Arc::clone(&ctx)).await;

    assert!(result.success);
    assert!(ctx.has_results());
}

#[tokio::test]
async fn test_events_follow_node_lifecycle() {
    let handler = Arc::new(CollectingEventHandler::new());
    let engine = PipelineBuilder::new("events")
        .step("a", value(json!(1)))
        .add_node(Node::new("b", Arc::new(FailingStep::permanent("boom"))))
        .step("c", value(json!(3)))
        .chain(&["a", "b", "c"])
        .with_event_handler(handler.clone())
        .build()
        .unwrap();

    engine.run_with_inputs(json!(null)).await;

    assert_eq!(handler.node_ids("node.started"), vec!["a", "b"]);
    assert_eq!(handler.node_ids("node.completed"), vec!["a"]);
    assert_eq!(handler.node_ids("node.failed"), vec!["b"]);
    assert_eq!(handler.node_ids("node.skipped"), vec!["c"]);

    let events = handler.events();
    match events.last() {
        Some(PipelineEvent::PipelineCompleted {
            pipeline, success, ..
        }) => {
            assert_eq!(pipeline, "events");
            assert!(!success);
        }
        other => panic!("expected pipeline completion last, got {other:?}"),
    }
    assert_eq!(handler.events_of_type("pipeline.").len(), 1);
}

#[tokio::test]
async fn test_broken_event_handler_does_not_affect_run() {
    struct Broken;

    #[async_trait]
    impl PipelineEventHandler for Broken {
        async fn on_node_start(&self, _node_id: &str, _pipeline: &str) -> anyhow::Result<()> {
            anyhow::bail!("sink unavailable")
        }

        async fn on_node_complete(
            &self,
            _node_id: &str,
            _pipeline: &str,
            _latency_ms: f64,
        ) -> anyhow::Result<()> {
            panic!("handler bug")
        }
    }

    let engine = PipelineBuilder::new("events")
        .step("a", value(json!(1)))
        .step("b", value(json!(2)))
        .chain(&["a", "b"])
        .with_event_handler(Arc::new(Broken))
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert!(result.success);
    assert_eq!(result.final_output, Some(json!(2)));
}

struct MeteredAgent;

#[async_trait]
impl Agent for MeteredAgent {
    fn name(&self) -> &str {
        "metered"
    }

    async fn run(&self, prompt: Value, _ctx: &ExecutionContext) -> Result<AgentResponse, StepError> {
        Ok(AgentResponse::new(json!(format!("answer to {prompt}")))
            .with_usage(UsageRecord::new("", "test-model").with_tokens(10, 5)))
    }
}

#[tokio::test]
async fn test_usage_is_aggregated() {
    let engine = PipelineBuilder::new("usage")
        .step("ask", Arc::new(AgentStep::new(Arc::new(MeteredAgent))))
        .step("ask_again", Arc::new(AgentStep::new(Arc::new(MeteredAgent))))
        .chain(&["ask", "ask_again"])
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!("q")).await;

    let usage = result.usage.unwrap();
    assert_eq!(usage.total_tokens, 30);
    assert_eq!(usage.total_requests, 2);
    assert_eq!(usage.by_agent["metered"].total_tokens, 30);
    assert_eq!(usage.by_model["test-model"].requests, 2);
}

#[tokio::test]
async fn test_usage_tracking_can_be_disabled() {
    let mut config = EngineConfig::default();
    config.usage_tracking = false;
    let engine = PipelineBuilder::new("usage")
        .step("ask", Arc::new(AgentStep::new(Arc::new(MeteredAgent))))
        .with_config(config)
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!("q")).await;

    assert!(result.usage.is_none());
}

#[tokio::test]
async fn test_memory_handle_reaches_executors() {
    #[derive(Debug)]
    struct Memory {
        facts: Vec<&'static str>,
    }

    let step = AsyncFnStep::new(|ctx: Arc<ExecutionContext>, _inputs| async move {
        let Some(memory) = ctx.memory::<Memory>() else {
            return Err(StepError::permanent("no memory"));
        };
        Ok(json!(memory.facts.len()))
    });
    let engine = PipelineBuilder::new("memory")
        .step("recall", Arc::new(step))
        .build()
        .unwrap();

    let ctx = ExecutionContext::new(json!(null)).with_memory(Arc::new(Memory {
        facts: vec!["sky is blue", "water is wet"],
    }));
    let result = engine.run(Arc::new(ctx)).await;

    assert_eq!(result.final_output, Some(json!(2)));
}

#[tokio::test]
async fn test_engine_is_reusable_across_concurrent_runs() {
    let engine = Arc::new(
        PipelineBuilder::new("shared")
            .step(
                "echo",
                Arc::new(FnStep::new(|i: &NodeInputs| {
                    Ok(i.input().cloned().unwrap_or(Value::Null))
                })),
            )
            .build()
            .unwrap(),
    );

    let runs = (0..8).map(|i| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run_with_inputs(json!(i)).await })
    });
    let results = futures::future::join_all(runs).await;

    for (i, result) in results.into_iter().enumerate() {
        let result = result.unwrap();
        assert_eq!(result.final_output, Some(json!(i)));
    }
}

#[tokio::test]
async fn test_mock_executor_receives_resolved_inputs() {
    let mut mock = MockStepExecutor::new();
    mock.expect_execute()
        .withf(|_ctx, inputs| inputs.get("left") == Some(&json!("l")) && inputs.is_absent("right"))
        .times(1)
        .returning(|_, _| Ok(json!("merged")));

    let engine = PipelineBuilder::new("mock")
        .step("left", value(json!("l")))
        .add_node(Node::new("right", value(json!("r"))).when(|_| false))
        .step("merge", Arc::new(mock))
        .add_edge_with(Edge::new("left", "merge").with_input_key("left"))
        .add_edge_with(Edge::new("right", "merge").with_input_key("right"))
        .build()
        .unwrap();

    let result = engine.run_with_inputs(json!(null)).await;

    assert_eq!(result.final_output, Some(json!("merged")));
    assert_eq!(result.node("merge").map(|r| r.status()), Some(NodeStatus::Succeeded));
}
