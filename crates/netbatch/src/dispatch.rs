//! Dispatch stage: hands completed batches to the sink
//!
//! Before sending, every item is checked against the sink's per-item size
//! limit. One oversized item fails the whole batch; items are never silently
//! dropped. No local retry: under [`FailurePolicy::StopPipeline`] the first
//! failure aborts the pipeline.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::config::FailurePolicy;
use crate::error::{PipelineError, SinkError};
use crate::lifecycle::Lifecycle;
use crate::message::Batch;
use crate::observer::{PipelineObserver, Stage};
use crate::queue::StageQueue;
use crate::sink::BatchSink;

/// Check every item against `limit`. The first offending item fails the batch.
pub fn validate_item_sizes(batch: &Batch, limit: Option<usize>) -> Result<(), SinkError> {
    let Some(limit) = limit else {
        return Ok(());
    };
    match batch
        .items()
        .iter()
        .enumerate()
        .find(|(_, item)| item.len() > limit)
    {
        Some((index, item)) => Err(SinkError::Oversized {
            batch_id: batch.id(),
            index,
            size: item.len(),
            limit,
        }),
        None => Ok(()),
    }
}

/// Validate then send one batch. The batch is delivered whole or not at all.
pub async fn dispatch_batch(sink: &dyn BatchSink, batch: &Batch) -> Result<(), SinkError> {
    validate_item_sizes(batch, sink.max_item_bytes())?;
    sink.send(batch).await
}

/// Per-worker dispatch counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatchCounts {
    pub(crate) delivered: u64,
    pub(crate) failed: u64,
}

pub(crate) struct DispatchWorker {
    pub(crate) id: usize,
    pub(crate) batches: StageQueue<Batch>,
    pub(crate) sink: Arc<dyn BatchSink>,
    pub(crate) policy: FailurePolicy,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) observer: Arc<dyn PipelineObserver>,
}

impl DispatchWorker {
    /// Run until the batch queue is complete and drained, or until abort.
    pub(crate) async fn run(self) -> DispatchCounts {
        self.observer.stage_started(Stage::Dispatch, self.id);
        let abort: CancellationToken = self.lifecycle.abort_token().clone();
        let mut counts = DispatchCounts::default();

        loop {
            let batch = tokio::select! {
                biased;
                _ = abort.cancelled() => break,
                next = self.batches.pop() => match next {
                    Some(batch) => batch,
                    None => break,
                },
            };

            match dispatch_batch(self.sink.as_ref(), &batch).await {
                Ok(()) => {
                    counts.delivered += 1;
                    self.observer.batch_dispatched(&batch);
                }
                Err(e) => {
                    counts.failed += 1;
                    self.observer.dispatch_failed(&batch, &e);
                    match self.policy {
                        FailurePolicy::StopPipeline => {
                            error!(
                                worker = self.id,
                                batch_id = %batch.id(),
                                error = %e,
                                "Dispatch failed, stopping pipeline"
                            );
                            self.lifecycle.fail(PipelineError::Dispatch {
                                batch_id: batch.id(),
                                source: e,
                            });
                            break;
                        }
                        FailurePolicy::DropBatch => {
                            warn!(
                                worker = self.id,
                                batch_id = %batch.id(),
                                items = batch.len(),
                                error = %e,
                                "Dispatch failed, batch dropped"
                            );
                        }
                    }
                }
            }
        }

        self.observer.stage_stopped(Stage::Dispatch, self.id);
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::PipelineState;
    use crate::message::Message;
    use crate::observer::TracingObserver;
    use crate::sink::MemorySink;

    fn batch(items: &[&str]) -> Batch {
        Batch::new(items.iter().map(|s| Message::new(s.to_string())).collect()).unwrap()
    }

    fn running_lifecycle() -> Arc<Lifecycle> {
        let lc = Arc::new(Lifecycle::new(
            StageQueue::unbounded("intake"),
            Arc::new(TracingObserver),
        ));
        lc.begin().unwrap();
        lc
    }

    fn worker(
        batches: &StageQueue<Batch>,
        sink: Arc<MemorySink>,
        policy: FailurePolicy,
        lifecycle: &Arc<Lifecycle>,
    ) -> DispatchWorker {
        DispatchWorker {
            id: 0,
            batches: batches.clone(),
            sink,
            policy,
            lifecycle: lifecycle.clone(),
            observer: Arc::new(TracingObserver),
        }
    }

    #[test]
    fn test_validate_item_sizes() {
        let b = batch(&["ok", "this one is too long", "ok"]);
        assert!(validate_item_sizes(&b, None).is_ok());
        assert!(validate_item_sizes(&b, Some(100)).is_ok());

        match validate_item_sizes(&b, Some(5)) {
            Err(SinkError::Oversized { index, size, limit, batch_id }) => {
                assert_eq!(index, 1);
                assert_eq!(size, 20);
                assert_eq!(limit, 5);
                assert_eq!(batch_id, b.id());
            }
            other => panic!("expected oversized, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_item_is_never_sent() {
        let sink = MemorySink::new().with_max_item_bytes(4);
        let err = dispatch_batch(&sink, &batch(&["tiny", "enormous"]))
            .await
            .unwrap_err();
        assert!(err.is_unsendable());
        assert_eq!(sink.attempts(), 0);
        assert!(sink.batches().is_empty());
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let batches = StageQueue::unbounded("batches");
        let sink = Arc::new(MemorySink::new());
        let lc = running_lifecycle();

        batches.push(batch(&["a"])).await.unwrap();
        batches.push(batch(&["b", "c"])).await.unwrap();
        batches.mark_complete();

        let counts = worker(&batches, sink.clone(), FailurePolicy::StopPipeline, &lc)
            .run()
            .await;
        assert_eq!(counts, DispatchCounts { delivered: 2, failed: 0 });
        assert_eq!(sink.batches().len(), 2);
        assert_eq!(lc.state(), PipelineState::Running);
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline() {
        let batches = StageQueue::unbounded("batches");
        let sink = Arc::new(MemorySink::new().failing("broker unavailable"));
        let lc = running_lifecycle();

        batches.push(batch(&["a"])).await.unwrap();
        batches.push(batch(&["b"])).await.unwrap();

        let counts = worker(&batches, sink.clone(), FailurePolicy::StopPipeline, &lc)
            .run()
            .await;

        assert_eq!(counts, DispatchCounts { delivered: 0, failed: 1 });
        assert_eq!(sink.attempts(), 1, "second batch must not be sent");
        assert!(lc.abort_token().is_cancelled());
        assert_eq!(lc.state(), PipelineState::Stopping);
        assert!(matches!(lc.failure(), Some(PipelineError::Dispatch { .. })));
    }

    #[tokio::test]
    async fn test_drop_batch_policy_keeps_going() {
        let batches = StageQueue::unbounded("batches");
        let sink = Arc::new(MemorySink::new().with_max_item_bytes(3));
        let lc = running_lifecycle();

        batches.push(batch(&["way too big"])).await.unwrap();
        batches.push(batch(&["ok"])).await.unwrap();
        batches.mark_complete();

        let counts = worker(&batches, sink.clone(), FailurePolicy::DropBatch, &lc)
            .run()
            .await;

        assert_eq!(counts, DispatchCounts { delivered: 1, failed: 1 });
        assert_eq!(sink.batches().len(), 1);
        assert!(lc.failure().is_none());
        assert_eq!(lc.state(), PipelineState::Running);
    }
}
