//! Token usage records reported by executors and their aggregation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single usage record reported by an executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Agent that made the call.
    #[serde(default)]
    pub agent: String,
    /// Model identifier.
    #[serde(default)]
    pub model: String,
    /// Prompt tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u64,
    /// Number of model requests.
    #[serde(default)]
    pub request_count: u64,
    /// Cost in USD.
    #[serde(default)]
    pub cost_usd: f64,
    /// Call latency in milliseconds.
    #[serde(default)]
    pub latency_ms: f64,
    /// Run correlation id, filled in when recorded into a context.
    #[serde(default)]
    pub correlation_id: String,
}

impl UsageRecord {
    /// Creates a record for an agent/model pair.
    #[must_use]
    pub fn new(agent: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            model: model.into(),
            request_count: 1,
            ..Self::default()
        }
    }

    /// Sets the token counts; the total is derived.
    #[must_use]
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self.total_tokens = input + output;
        self
    }

    /// Sets the cost.
    #[must_use]
    pub fn with_cost_usd(mut self, cost: f64) -> Self {
        self.cost_usd = cost;
        self
    }

    /// Sets the latency.
    #[must_use]
    pub fn with_latency_ms(mut self, latency: f64) -> Self {
        self.latency_ms = latency;
        self
    }
}

/// Totals for one breakdown bucket (a model or an agent).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageBucket {
    /// Total tokens.
    pub total_tokens: u64,
    /// Cost in USD.
    pub cost_usd: f64,
    /// Number of requests.
    pub requests: u64,
}

/// Aggregated usage across a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Sum of prompt tokens.
    pub total_input_tokens: u64,
    /// Sum of completion tokens.
    pub total_output_tokens: u64,
    /// Sum of all tokens.
    pub total_tokens: u64,
    /// Sum of cost.
    pub total_cost_usd: f64,
    /// Sum of requests.
    pub total_requests: u64,
    /// Sum of latencies.
    pub total_latency_ms: f64,
    /// Number of records aggregated.
    pub record_count: usize,
    /// Breakdown by model.
    pub by_model: BTreeMap<String, UsageBucket>,
    /// Breakdown by agent.
    pub by_agent: BTreeMap<String, UsageBucket>,
}

impl UsageSummary {
    /// Aggregates a slice of records.
    #[must_use]
    pub fn from_records(records: &[UsageRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.total_input_tokens += record.input_tokens;
            summary.total_output_tokens += record.output_tokens;
            summary.total_tokens += record.total_tokens;
            summary.total_cost_usd += record.cost_usd;
            summary.total_requests += record.request_count;
            summary.total_latency_ms += record.latency_ms;
            summary.record_count += 1;

            for (map, key) in [
                (&mut summary.by_model, &record.model),
                (&mut summary.by_agent, &record.agent),
            ] {
                let bucket = map.entry(key.clone()).or_default();
                bucket.total_tokens += record.total_tokens;
                bucket.cost_usd += record.cost_usd;
                bucket.requests += record.request_count;
            }
        }
        summary
    }
}

/// Thread-safe accumulator owned by an execution context.
#[derive(Debug, Default)]
pub struct UsageTracker {
    records: Mutex<Vec<UsageRecord>>,
}

impl UsageTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn record(&self, record: UsageRecord) {
        self.records.lock().push(record);
    }

    /// Returns a copy of all records.
    #[must_use]
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().clone()
    }

    /// Returns the summary, or `None` when nothing was recorded.
    #[must_use]
    pub fn summary(&self) -> Option<UsageSummary> {
        let records = self.records.lock();
        if records.is_empty() {
            None
        } else {
            Some(UsageSummary::from_records(&records))
        }
    }
}
