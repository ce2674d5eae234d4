//! Engine configuration.
//!
//! Every field has a default so a partial JSON document or an empty
//! environment still yields a usable configuration.

use crate::errors::DagflowError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Prefix for environment variables read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "DAGFLOW_";

/// Runtime configuration shared by every run of a [`crate::pipeline::PipelineEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of node attempts executing at the same time.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Upper bound of the additive jitter, as a fraction of the base delay.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Optional cap on the base backoff delay in milliseconds.
    #[serde(default)]
    pub max_backoff_ms: Option<u64>,
    /// How long a finished run waits for queued events to be delivered.
    #[serde(default = "default_event_drain_timeout_ms")]
    pub event_drain_timeout_ms: u64,
    /// Whether usage records are aggregated into the pipeline result.
    #[serde(default = "default_usage_tracking")]
    pub usage_tracking: bool,
}

fn default_jitter_ratio() -> f64 {
    0.5
}

fn default_event_drain_timeout_ms() -> u64 {
    1000
}

fn default_usage_tracking() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            jitter_ratio: default_jitter_ratio(),
            max_backoff_ms: None,
            event_drain_timeout_ms: default_event_drain_timeout_ms(),
            usage_tracking: default_usage_tracking(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits how many node attempts may run at once.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Sets the jitter ratio.
    #[must_use]
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    /// Caps the base backoff delay.
    #[must_use]
    pub fn with_max_backoff_ms(mut self, max: u64) -> Self {
        self.max_backoff_ms = Some(max);
        self
    }

    /// Sets the event drain timeout.
    #[must_use]
    pub fn with_event_drain_timeout_ms(mut self, timeout: u64) -> Self {
        self.event_drain_timeout_ms = timeout;
        self
    }

    /// Enables or disables usage aggregation.
    #[must_use]
    pub fn with_usage_tracking(mut self, enabled: bool) -> Self {
        self.usage_tracking = enabled;
        self
    }

    /// Returns the event drain timeout as a duration.
    #[must_use]
    pub fn event_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.event_drain_timeout_ms)
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, DagflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `DAGFLOW_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, DagflowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DagflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(raw) = var("MAX_CONCURRENCY") {
            config.max_concurrency = Some(parse_value("MAX_CONCURRENCY", &raw)?);
        }
        if let Some(raw) = var("JITTER_RATIO") {
            config.jitter_ratio = parse_value("JITTER_RATIO", &raw)?;
        }
        if let Some(raw) = var("MAX_BACKOFF_MS") {
            config.max_backoff_ms = Some(parse_value("MAX_BACKOFF_MS", &raw)?);
        }
        if let Some(raw) = var("EVENT_DRAIN_TIMEOUT_MS") {
            config.event_drain_timeout_ms = parse_value("EVENT_DRAIN_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = var("USAGE_TRACKING") {
            config.usage_tracking = parse_value("USAGE_TRACKING", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), DagflowError> {
        if self.max_concurrency == Some(0) {
            return Err(DagflowError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if !self.jitter_ratio.is_finite() || self.jitter_ratio < 0.0 {
            return Err(DagflowError::Config(format!(
                "jitter_ratio must be a non-negative number, got {}",
                self.jitter_ratio
            )));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T, DagflowError> {
    raw.trim().parse().map_err(|_| {
        DagflowError::Config(format!("{ENV_PREFIX}{name} has an invalid value: '{raw}'"))
    })
}
