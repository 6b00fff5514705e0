//! Pipeline tuning knobs
//!
//! All settings are fixed for the lifetime of a pipeline run.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

use crate::error::PipelineError;

/// Window used by the reference deployment
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(6500);

/// Stand-in per-message work used by the reference deployment
pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_millis(50);

/// What dispatch does when the sink rejects or fails a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Fail fast: stop the whole pipeline on the first failed batch
    #[default]
    StopPipeline,
    /// Log and count the failed batch, keep dispatching
    DropBatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wall-clock length of one assembly window
    #[serde(deserialize_with = "deserialize_duration")]
    pub window: Duration,
    pub processing_workers: usize,
    pub assembly_workers: usize,
    pub dispatch_workers: usize,
    /// Bound on the processed-message queue; unbounded when absent
    pub ready_queue_capacity: Option<usize>,
    /// Delay applied by `DelayProcessor` to each message
    #[serde(deserialize_with = "deserialize_duration")]
    pub processing_delay: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            processing_workers: 1,
            assembly_workers: 1,
            dispatch_workers: 1,
            ready_queue_capacity: None,
            processing_delay: DEFAULT_PROCESSING_DELAY,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.window.is_zero() {
            return Err(PipelineError::Config(
                "window must be greater than zero".to_string(),
            ));
        }
        for (name, count) in [
            ("processing_workers", self.processing_workers),
            ("assembly_workers", self.assembly_workers),
            ("dispatch_workers", self.dispatch_workers),
        ] {
            if count == 0 {
                return Err(PipelineError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.ready_queue_capacity == Some(0) {
            return Err(PipelineError::Config(
                "ready_queue_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration string like "250ms", "15s", "5m", "1h", "1d".
pub fn parse_duration(s: &str) -> Result<Duration, PipelineError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(PipelineError::Config("empty duration".to_string()));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| PipelineError::Config(format!("missing unit in duration: {}", s)))?;
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .parse()
        .map_err(|_| PipelineError::Config(format!("invalid duration: {}", s)))?;

    let secs_per_unit: u64 = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        _ => return Err(PipelineError::Config(format!("unknown unit: {}", unit))),
    };
    num.checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| PipelineError::Config(format!("duration out of range: {}", s)))
}

/// Serde adapter for duration strings such as `"6500ms"` or `"15m"`
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}
