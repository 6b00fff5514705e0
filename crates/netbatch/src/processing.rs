//! Processing stage: per-message work between intake and assembly
//!
//! Each worker pulls one message at a time from the intake queue, runs the
//! [`Processor`] on it and pushes the result to the ready queue. The processor
//! call occupies the worker for its whole duration; configure more workers to
//! keep a slow processor from holding up the intake queue. With one worker,
//! arrival order is preserved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::message::Message;
use crate::observer::{PipelineObserver, Stage};
use crate::queue::StageQueue;

/// Per-message transformation run before a message becomes batch-eligible
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, message: Message) -> Message;
}

/// Holds each message for a fixed delay, standing in for real work
#[derive(Debug, Clone, Copy)]
pub struct DelayProcessor {
    delay: Duration,
}

impl DelayProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl Processor for DelayProcessor {
    async fn process(&self, message: Message) -> Message {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        message
    }
}

/// Forwards messages untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

#[async_trait]
impl Processor for PassThrough {
    async fn process(&self, message: Message) -> Message {
        message
    }
}

pub(crate) struct ProcessingWorker {
    pub(crate) id: usize,
    pub(crate) intake: StageQueue<Message>,
    pub(crate) ready: StageQueue<Message>,
    pub(crate) processor: Arc<dyn Processor>,
    pub(crate) abort: CancellationToken,
    pub(crate) observer: Arc<dyn PipelineObserver>,
}

impl ProcessingWorker {
    /// Run until the intake queue is complete and drained, or until abort.
    /// Returns the number of messages handed to the ready queue.
    pub(crate) async fn run(self) -> u64 {
        self.observer.stage_started(Stage::Processing, self.id);
        let mut processed: u64 = 0;

        loop {
            let message = tokio::select! {
                biased;
                _ = self.abort.cancelled() => break,
                next = self.intake.pop() => match next {
                    Some(message) => message,
                    None => break,
                },
            };

            let message = self.processor.process(message).await;

            let pushed = tokio::select! {
                biased;
                _ = self.abort.cancelled() => false,
                result = self.ready.push(message) => result.is_ok(),
            };
            if !pushed {
                debug!(worker = self.id, "Ready queue closed, dropping processed message");
                break;
            }
            processed += 1;
        }

        self.observer.stage_stopped(Stage::Processing, self.id);
        processed
    }
}
