//! Pipeline observers
//!
//! Stages report what happens to them through [`PipelineObserver`]; logging and
//! metrics are observers, not part of the stage logic.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::SinkError;
use crate::lifecycle::PipelineState;
use crate::message::Batch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Intake,
    Processing,
    Assembly,
    Dispatch,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Processing => "processing",
            Stage::Assembly => "assembly",
            Stage::Dispatch => "dispatch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callbacks invoked by the pipeline. All methods default to no-ops.
///
/// Called from worker tasks, so implementations must be cheap and must not
/// block.
pub trait PipelineObserver: Send + Sync {
    fn state_changed(&self, _state: PipelineState) {}

    fn stage_started(&self, _stage: Stage, _worker: usize) {}

    fn stage_stopped(&self, _stage: Stage, _worker: usize) {}

    /// A message of `bytes` length was accepted by intake
    fn message_submitted(&self, _bytes: usize) {}

    fn batch_created(&self, _batch: &Batch, _worker: usize) {}

    fn batch_dispatched(&self, _batch: &Batch) {}

    fn dispatch_failed(&self, _batch: &Batch, _error: &SinkError) {}
}

/// Structured `tracing` output for pipeline events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn state_changed(&self, state: PipelineState) {
        info!(state = %state, "Pipeline state changed");
    }

    fn stage_started(&self, stage: Stage, worker: usize) {
        info!(stage = %stage, worker, "Stage worker started");
    }

    fn stage_stopped(&self, stage: Stage, worker: usize) {
        info!(stage = %stage, worker, "Stage worker stopped");
    }

    fn batch_created(&self, batch: &Batch, worker: usize) {
        debug!(
            batch_id = %batch.id(),
            items = batch.len(),
            bytes = batch.payload_bytes(),
            worker,
            "Batch created"
        );
    }

    fn batch_dispatched(&self, batch: &Batch) {
        debug!(batch_id = %batch.id(), items = batch.len(), "Batch dispatched");
    }

    fn dispatch_failed(&self, batch: &Batch, error: &SinkError) {
        error!(
            batch_id = %batch.id(),
            items = batch.len(),
            error = %error,
            unsendable = error.is_unsendable(),
            "Batch dispatch failed"
        );
    }
}

/// Fans every event out to a list of observers, in order
#[derive(Default, Clone)]
pub struct Observers {
    inner: Vec<Arc<dyn PipelineObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.inner.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl PipelineObserver for Observers {
    fn state_changed(&self, state: PipelineState) {
        self.inner.iter().for_each(|o| o.state_changed(state));
    }

    fn stage_started(&self, stage: Stage, worker: usize) {
        self.inner.iter().for_each(|o| o.stage_started(stage, worker));
    }

    fn stage_stopped(&self, stage: Stage, worker: usize) {
        self.inner.iter().for_each(|o| o.stage_stopped(stage, worker));
    }

    fn message_submitted(&self, bytes: usize) {
        self.inner.iter().for_each(|o| o.message_submitted(bytes));
    }

    fn batch_created(&self, batch: &Batch, worker: usize) {
        self.inner.iter().for_each(|o| o.batch_created(batch, worker));
    }

    fn batch_dispatched(&self, batch: &Batch) {
        self.inner.iter().for_each(|o| o.batch_dispatched(batch));
    }

    fn dispatch_failed(&self, batch: &Batch, error: &SinkError) {
        self.inner.iter().for_each(|o| o.dispatch_failed(batch, error));
    }
}
