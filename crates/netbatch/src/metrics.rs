//! Prometheus metrics for the batching pipeline

use chrono::Utc;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    TextEncoder,
};

use crate::error::SinkError;
use crate::lifecycle::PipelineState;
use crate::message::Batch;
use crate::observer::{PipelineObserver, Stage};

const LABEL_STAGE: &str = "stage";
const LABEL_KIND: &str = "kind";

static MESSAGES_SUBMITTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "netbatch_messages_submitted_total",
        "Messages accepted by intake"
    )
    .expect("Failed to register messages_submitted_total metric")
});

static MESSAGE_BYTES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "netbatch_message_bytes_total",
        "Payload bytes accepted by intake"
    )
    .expect("Failed to register message_bytes_total metric")
});

static BATCHES_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "netbatch_batches_created_total",
        "Batches produced by assembly windows"
    )
    .expect("Failed to register batches_created_total metric")
});

static BATCH_ITEMS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "netbatch_batch_items_total",
        "Messages placed into batches"
    )
    .expect("Failed to register batch_items_total metric")
});

static BATCHES_DISPATCHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "netbatch_batches_dispatched_total",
        "Batches delivered to the sink"
    )
    .expect("Failed to register batches_dispatched_total metric")
});

/// kind = unsendable | transport
static DISPATCH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "netbatch_dispatch_failures_total",
        "Batches the sink refused or failed to deliver",
        &[LABEL_KIND]
    )
    .expect("Failed to register dispatch_failures_total metric")
});

/// Seconds from the oldest item's intake to successful delivery
static BATCH_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "netbatch_batch_latency_seconds",
        "Intake-to-delivery latency of the oldest item in each batch",
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 7.5, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register batch_latency_seconds metric")
});

static ACTIVE_WORKERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "netbatch_active_workers",
        "Running worker loops per stage",
        &[LABEL_STAGE]
    )
    .expect("Failed to register active_workers metric")
});

/// 0 = not started, 1 = running, 2 = stopping, 3 = stopped
static PIPELINE_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("netbatch_pipeline_state", "Pipeline lifecycle state")
        .expect("Failed to register pipeline_state metric")
});

/// Records pipeline events into the process-wide Prometheus registry
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl PipelineObserver for MetricsObserver {
    fn state_changed(&self, state: PipelineState) {
        PIPELINE_STATE.set(state.code());
    }

    fn stage_started(&self, stage: Stage, _worker: usize) {
        ACTIVE_WORKERS.with_label_values(&[stage.as_str()]).inc();
    }

    fn stage_stopped(&self, stage: Stage, _worker: usize) {
        ACTIVE_WORKERS.with_label_values(&[stage.as_str()]).dec();
    }

    fn message_submitted(&self, bytes: usize) {
        MESSAGES_SUBMITTED_TOTAL.inc();
        MESSAGE_BYTES_TOTAL.inc_by(bytes as u64);
    }

    fn batch_created(&self, batch: &Batch, _worker: usize) {
        BATCHES_CREATED_TOTAL.inc();
        BATCH_ITEMS_TOTAL.inc_by(batch.len() as u64);
    }

    fn batch_dispatched(&self, batch: &Batch) {
        BATCHES_DISPATCHED_TOTAL.inc();
        let latency = (Utc::now() - batch.oldest_received_at()).num_milliseconds();
        BATCH_LATENCY_SECONDS.observe(latency.max(0) as f64 / 1000.0);
    }

    fn dispatch_failed(&self, _batch: &Batch, error: &SinkError) {
        let kind = if error.is_unsendable() {
            "unsendable"
        } else {
            "transport"
        };
        DISPATCH_FAILURES_TOTAL.with_label_values(&[kind]).inc();
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
