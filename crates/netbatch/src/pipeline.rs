//! Lifecycle controller: builds the stage queues, starts every worker loop and
//! coordinates the drain on shutdown.
//!
//! Workers are spawned consumers first (dispatch, assembly, processing), so
//! each stage is listening before anything upstream produces. On stop, each
//! downstream queue is marked complete only after every worker of the stage
//! feeding it has exited, which lets the drain ripple left to right.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assembly::AssemblyWorker;
use crate::config::PipelineConfig;
use crate::dispatch::{DispatchCounts, DispatchWorker};
use crate::error::PipelineError;
use crate::intake::Intake;
use crate::lifecycle::{Lifecycle, PipelineState};
use crate::message::{Batch, Message};
use crate::observer::{PipelineObserver, Stage, TracingObserver};
use crate::processing::{DelayProcessor, Processor, ProcessingWorker};
use crate::queue::StageQueue;
use crate::sink::BatchSink;

/// Totals for one pipeline run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub messages_processed: u64,
    pub batches_created: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    /// Messages still queued when their stage exited (abort only)
    pub discarded_messages: usize,
    /// Completed batches never handed to the sink (abort only)
    pub discarded_batches: usize,
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    sink: Arc<dyn BatchSink>,
    processor: Option<Arc<dyn Processor>>,
    observer: Option<Arc<dyn PipelineObserver>>,
}

impl PipelineBuilder {
    pub fn new(sink: Arc<dyn BatchSink>) -> Self {
        Self {
            config: PipelineConfig::default(),
            sink,
            processor: None,
            observer: None,
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a [`DelayProcessor`] using `processing_delay`
    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Defaults to [`TracingObserver`]
    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        self.config.validate()?;

        let processor = self
            .processor
            .unwrap_or_else(|| Arc::new(DelayProcessor::new(self.config.processing_delay)));
        let observer = self.observer.unwrap_or_else(|| Arc::new(TracingObserver));

        let intake = StageQueue::unbounded("intake");
        let ready = StageQueue::with_capacity("ready", self.config.ready_queue_capacity);
        let batches = StageQueue::unbounded("batches");
        let lifecycle = Arc::new(Lifecycle::new(intake.clone(), observer.clone()));

        Ok(Pipeline {
            config: self.config,
            lifecycle,
            intake,
            ready,
            batches,
            processor,
            sink: self.sink,
            observer,
            supervisor: Mutex::new(None),
            report: Arc::new(Mutex::new(PipelineReport::default())),
        })
    }
}

/// Cloneable handle that can request a stop from anywhere (signal handlers,
/// other threads) without holding the pipeline itself.
#[derive(Clone)]
pub struct StopHandle {
    lifecycle: Arc<Lifecycle>,
}

impl StopHandle {
    pub fn request_stop(&self) -> bool {
        self.lifecycle.request_stop()
    }

    pub fn state(&self) -> PipelineState {
        self.lifecycle.state()
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    lifecycle: Arc<Lifecycle>,
    intake: StageQueue<Message>,
    ready: StageQueue<Message>,
    batches: StageQueue<Batch>,
    processor: Arc<dyn Processor>,
    sink: Arc<dyn BatchSink>,
    observer: Arc<dyn PipelineObserver>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    report: Arc<Mutex<PipelineReport>>,
}

impl Pipeline {
    pub fn builder(sink: Arc<dyn BatchSink>) -> PipelineBuilder {
        PipelineBuilder::new(sink)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Submit handle for message sources
    pub fn intake(&self) -> Intake {
        Intake::new(self.intake.clone(), self.observer.clone())
    }

    pub fn state(&self) -> PipelineState {
        self.lifecycle.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.lifecycle.subscribe()
    }

    /// Cancelled as soon as a stop is requested, for sources to stop producing
    pub fn stop_token(&self) -> CancellationToken {
        self.lifecycle.stop_token().clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            lifecycle: self.lifecycle.clone(),
        }
    }

    /// Spawn every worker loop. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), PipelineError> {
        self.lifecycle.begin()?;

        info!(
            window_ms = self.config.window.as_millis() as u64,
            processing_workers = self.config.processing_workers,
            assembly_workers = self.config.assembly_workers,
            dispatch_workers = self.config.dispatch_workers,
            ready_capacity = ?self.ready.capacity(),
            failure_policy = ?self.config.failure_policy,
            "Starting pipeline"
        );

        let mut dispatch = JoinSet::new();
        for id in 0..self.config.dispatch_workers {
            dispatch.spawn(
                DispatchWorker {
                    id,
                    batches: self.batches.clone(),
                    sink: self.sink.clone(),
                    policy: self.config.failure_policy,
                    lifecycle: self.lifecycle.clone(),
                    observer: self.observer.clone(),
                }
                .run(),
            );
        }

        let mut assembly = JoinSet::new();
        for id in 0..self.config.assembly_workers {
            assembly.spawn(
                AssemblyWorker {
                    id,
                    window: self.config.window,
                    ready: self.ready.clone(),
                    batches: self.batches.clone(),
                    stop: self.lifecycle.stop_token().clone(),
                    abort: self.lifecycle.abort_token().clone(),
                    observer: self.observer.clone(),
                }
                .run(),
            );
        }

        let mut processing = JoinSet::new();
        for id in 0..self.config.processing_workers {
            processing.spawn(
                ProcessingWorker {
                    id,
                    intake: self.intake.clone(),
                    ready: self.ready.clone(),
                    processor: self.processor.clone(),
                    abort: self.lifecycle.abort_token().clone(),
                    observer: self.observer.clone(),
                }
                .run(),
            );
        }

        let supervision = Supervision {
            lifecycle: self.lifecycle.clone(),
            intake: self.intake.clone(),
            ready: self.ready.clone(),
            batches: self.batches.clone(),
            sink: self.sink.clone(),
            report: self.report.clone(),
            processing,
            assembly,
            dispatch,
        };
        let handle = tokio::spawn(supervision.run());
        *self.supervisor.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Begin a graceful stop. Idempotent; safe from any thread.
    pub fn request_stop(&self) -> bool {
        self.lifecycle.request_stop()
    }

    /// Wait until every worker has exited.
    ///
    /// Returns the run totals, or the fatal error that stopped the pipeline.
    pub async fn wait(&self) -> Result<PipelineReport, PipelineError> {
        if self.state() == PipelineState::NotStarted {
            return Err(PipelineError::InvalidState(PipelineState::NotStarted));
        }

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Pipeline supervisor failed");
                self.lifecycle.fail(PipelineError::Worker(e.to_string()));
                self.lifecycle.finish();
            }
        }

        let mut rx = self.lifecycle.subscribe();
        let _ = rx.wait_for(|s| *s == PipelineState::Stopped).await;

        match self.lifecycle.failure() {
            Some(e) => Err(e),
            None => Ok(self.report()),
        }
    }

    /// Request a stop and wait for it to finish
    pub async fn shutdown(&self) -> Result<PipelineReport, PipelineError> {
        self.request_stop();
        self.wait().await
    }

    /// Totals so far; final once the pipeline is `Stopped`
    pub fn report(&self) -> PipelineReport {
        *self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Supervision {
    lifecycle: Arc<Lifecycle>,
    intake: StageQueue<Message>,
    ready: StageQueue<Message>,
    batches: StageQueue<Batch>,
    sink: Arc<dyn BatchSink>,
    report: Arc<Mutex<PipelineReport>>,
    processing: JoinSet<u64>,
    assembly: JoinSet<u64>,
    dispatch: JoinSet<DispatchCounts>,
}

impl Supervision {
    async fn run(mut self) {
        let mut report = PipelineReport {
            messages_processed: join_stage(&mut self.processing, Stage::Processing, &self.lifecycle)
                .await,
            ..Default::default()
        };
        self.ready.mark_complete();

        report.batches_created =
            join_stage(&mut self.assembly, Stage::Assembly, &self.lifecycle).await;
        self.batches.mark_complete();

        while let Some(result) = self.dispatch.join_next().await {
            match result {
                Ok(counts) => {
                    report.batches_delivered += counts.delivered;
                    report.batches_failed += counts.failed;
                }
                Err(e) => worker_failed(Stage::Dispatch, e, &self.lifecycle),
            }
        }

        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "Sink close failed");
        }

        report.discarded_messages = discard(&self.intake) + discard(&self.ready);
        report.discarded_batches = discard(&self.batches);
        if report.discarded_messages > 0 || report.discarded_batches > 0 {
            warn!(
                messages = report.discarded_messages,
                batches = report.discarded_batches,
                "Discarded in-flight work on abort"
            );
        }

        info!(
            processed = report.messages_processed,
            created = report.batches_created,
            delivered = report.batches_delivered,
            failed = report.batches_failed,
            "Pipeline stopped"
        );

        *self.report.lock().unwrap_or_else(PoisonError::into_inner) = report;
        self.lifecycle.finish();
    }
}

async fn join_stage(set: &mut JoinSet<u64>, stage: Stage, lifecycle: &Lifecycle) -> u64 {
    let mut total = 0;
    while let Some(result) = set.join_next().await {
        match result {
            Ok(count) => total += count,
            Err(e) => worker_failed(stage, e, lifecycle),
        }
    }
    total
}

fn worker_failed(stage: Stage, e: tokio::task::JoinError, lifecycle: &Lifecycle) {
    error!(stage = %stage, error = %e, "Worker task failed, aborting pipeline");
    lifecycle.fail(PipelineError::Worker(format!("{} worker: {}", stage, e)));
}

fn discard<T>(queue: &StageQueue<T>) -> usize {
    let mut count = 0;
    while queue.try_pop().is_some() {
        count += 1;
    }
    if count > 0 {
        debug!(queue = queue.name(), discarded = count, "Queue cleared");
    }
    count
}
