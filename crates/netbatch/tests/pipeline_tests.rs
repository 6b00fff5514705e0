//! End-to-end pipeline behaviour on a paused tokio clock
//!
//! Every test runs with `start_paused = true`, so windows of several seconds
//! elapse instantly and deterministically.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use netbatch::{
    FailurePolicy, MemorySink, Pipeline, PipelineConfig, PipelineError, PipelineState, SinkError,
    SubmitError,
};
use tokio::time::{sleep, Instant};

const WINDOW: Duration = Duration::from_millis(6500);

fn config() -> PipelineConfig {
    PipelineConfig {
        window: WINDOW,
        ..Default::default()
    }
}

fn pipeline(sink: &Arc<MemorySink>, config: PipelineConfig) -> Pipeline {
    Pipeline::builder(sink.clone())
        .config(config)
        .build()
        .expect("valid config")
}

fn items(sink: &MemorySink) -> Vec<Bytes> {
    sink.delivered_items()
}

#[tokio::test(start_paused = true)]
async fn test_messages_in_one_window_form_one_batch() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&sink, config());
    pipeline.start().unwrap();

    let intake = pipeline.intake();
    for payload in ["a", "b", "c"] {
        intake.submit(payload).unwrap();
    }

    sleep(WINDOW + Duration::from_millis(1000)).await;

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].items().iter().map(|m| m.data().clone()).collect::<Vec<_>>(),
        vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]
    );

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.messages_processed, 3);
    assert_eq!(report.batches_delivered, 1);
    assert_eq!(sink.batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_windows_dispatch_nothing() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&sink, config());
    pipeline.start().unwrap();

    sleep(WINDOW * 2).await;
    assert_eq!(sink.attempts(), 0);

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.batches_created, 0);
    assert_eq!(sink.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_stops_pipeline() {
    let sink = Arc::new(MemorySink::new().failing("connection refused"));
    let pipeline = pipeline(&sink, config());
    pipeline.start().unwrap();

    pipeline.intake().submit("x").unwrap();

    let err = pipeline.wait().await.unwrap_err();
    match err {
        PipelineError::Dispatch { source, .. } => {
            assert_eq!(source, SinkError::Transport("connection refused".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(sink.attempts(), 1);
    assert!(sink.batches().is_empty());
    assert_eq!(pipeline.intake().submit("late"), Err(SubmitError::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_item_stops_pipeline_without_sending() {
    let sink = Arc::new(MemorySink::new().with_max_item_bytes(4));
    let pipeline = pipeline(&sink, config());
    pipeline.start().unwrap();

    let intake = pipeline.intake();
    intake.submit("ok").unwrap();
    intake.submit("too-long-item").unwrap();

    let err = pipeline.wait().await.unwrap_err();
    match err {
        PipelineError::Dispatch {
            source: SinkError::Oversized { index, size, limit, .. },
            ..
        } => {
            assert_eq!(index, 1);
            assert_eq!(size, 13);
            assert_eq!(limit, 4);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(sink.batches().is_empty());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_no_batch_sent_after_fatal_failure() {
    let sink = Arc::new(MemorySink::new().failing("down"));
    let pipeline = pipeline(
        &sink,
        PipelineConfig {
            window: Duration::from_millis(500),
            ..config()
        },
    );
    pipeline.start().unwrap();

    let intake = pipeline.intake();
    for i in 0..20 {
        if intake.submit(format!("m{i}")).is_err() {
            break;
        }
        sleep(Duration::from_millis(200)).await;
    }

    assert!(pipeline.wait().await.is_err());
    assert_eq!(sink.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_drains_queued_messages_early() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&sink, config());
    pipeline.start().unwrap();

    let intake = pipeline.intake();
    for i in 0..5 {
        intake.submit(format!("m{i}")).unwrap();
    }

    let started = Instant::now();
    let report = pipeline.shutdown().await.unwrap();

    // Stop ends the open window; draining must not wait for it to elapse
    assert!(started.elapsed() < WINDOW);
    assert_eq!(report.messages_processed, 5);
    assert_eq!(report.discarded_messages, 0);
    assert_eq!(report.discarded_batches, 0);
    assert_eq!(
        items(&sink),
        (0..5).map(|i| Bytes::from(format!("m{i}"))).collect::<Vec<_>>()
    );
}

#[tokio::test(start_paused = true)]
async fn test_request_stop_is_idempotent() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&sink, config());
    pipeline.start().unwrap();

    assert!(pipeline.request_stop());
    assert!(!pipeline.request_stop());
    assert!(!pipeline.stop_handle().request_stop());

    pipeline.wait().await.unwrap();
    assert!(!pipeline.request_stop());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_states_are_observable() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&sink, config());
    let mut states = pipeline.watch_state();
    assert_eq!(*states.borrow_and_update(), PipelineState::NotStarted);

    pipeline.start().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);

    pipeline.request_stop();
    assert_ne!(pipeline.state(), PipelineState::Running);
    assert!(pipeline.stop_token().is_cancelled());

    pipeline.wait().await.unwrap();
    states.changed().await.unwrap();
    assert_eq!(*states.borrow(), PipelineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_start_and_wait_state_errors() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&sink, config());

    assert!(matches!(
        pipeline.wait().await,
        Err(PipelineError::InvalidState(PipelineState::NotStarted))
    ));

    pipeline.start().unwrap();
    assert!(matches!(
        pipeline.start(),
        Err(PipelineError::InvalidState(PipelineState::Running))
    ));

    pipeline.shutdown().await.unwrap();
    assert!(pipeline.start().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_start() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(&sink, config());

    assert!(pipeline.request_stop());
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.intake().submit("a"), Err(SubmitError::Stopped));
    assert!(pipeline.start().is_err());
    assert_eq!(pipeline.wait().await.unwrap(), Default::default());
}

#[tokio::test(start_paused = true)]
async fn test_parallel_workers_partition_messages() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(
        &sink,
        PipelineConfig {
            window: Duration::from_millis(1000),
            processing_workers: 4,
            assembly_workers: 3,
            dispatch_workers: 2,
            ..config()
        },
    );
    pipeline.start().unwrap();

    let intake = pipeline.intake();
    let mut expected = Vec::new();
    for i in 0..120 {
        let payload = format!("m{i:03}");
        intake.submit(payload.clone()).unwrap();
        expected.push(Bytes::from(payload));
        sleep(Duration::from_millis(25)).await;
    }

    let report = pipeline.shutdown().await.unwrap();
    let batches = sink.batches();

    let ids: HashSet<_> = batches.iter().map(|b| b.id()).collect();
    assert_eq!(ids.len(), batches.len());
    assert!(batches.iter().all(|b| !b.is_empty()));
    assert_eq!(report.batches_delivered as usize, batches.len());

    let mut delivered = items(&sink);
    delivered.sort();
    assert_eq!(delivered, expected);
}

#[tokio::test(start_paused = true)]
async fn test_drop_batch_policy_keeps_running() {
    let sink = Arc::new(MemorySink::new().failing("flaky"));
    let pipeline = pipeline(
        &sink,
        PipelineConfig {
            failure_policy: FailurePolicy::DropBatch,
            ..config()
        },
    );
    pipeline.start().unwrap();
    let intake = pipeline.intake();

    intake.submit("lost").unwrap();
    sleep(WINDOW + Duration::from_millis(1000)).await;
    assert_eq!(pipeline.state(), PipelineState::Running);
    assert_eq!(sink.attempts(), 1);

    sink.set_failure(None);
    intake.submit("kept").unwrap();
    sleep(WINDOW + Duration::from_millis(1000)).await;

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.batches_delivered, 1);
    assert_eq!(items(&sink), vec![Bytes::from("kept")]);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_ready_queue_still_delivers_everything() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = pipeline(
        &sink,
        PipelineConfig {
            ready_queue_capacity: Some(2),
            processing_workers: 2,
            processing_delay: Duration::from_millis(1),
            ..config()
        },
    );
    pipeline.start().unwrap();

    let intake = pipeline.intake();
    for i in 0..50 {
        intake.submit(format!("m{i:02}")).unwrap();
    }

    let report = pipeline.shutdown().await.unwrap();
    assert_eq!(report.messages_processed, 50);
    assert_eq!(items(&sink).len(), 50);
}

#[test]
fn test_invalid_config_rejected_at_build() {
    let sink = Arc::new(MemorySink::new());
    let result = Pipeline::builder(sink)
        .config(PipelineConfig {
            window: Duration::ZERO,
            ..Default::default()
        })
        .build();
    assert!(matches!(result, Err(PipelineError::Config(_))));
}
