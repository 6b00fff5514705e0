//! NATS JetStream batch sink
//!
//! Each batch goes out as ONE JetStream message so the broker sees it whole or
//! not at all. Body is the items joined with `\n`; the batch id and item count
//! travel as headers. The publish ack is awaited before the batch counts as
//! delivered.

use std::sync::atomic::{AtomicU64, Ordering};

use async_nats::jetstream::{self, Context};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info};

use crate::error::SinkError;
use crate::message::Batch;
use crate::sink::BatchSink;

pub const HEADER_BATCH_ID: &str = "Batch-Id";
pub const HEADER_BATCH_SIZE: &str = "Batch-Size";

/// Server default `max_payload`, used until the server reports its own
const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Encode a batch body: items in order, newline separated.
pub fn encode_batch(batch: &Batch) -> Bytes {
    let len = batch.payload_bytes() + batch.len().saturating_sub(1);
    let mut buf = BytesMut::with_capacity(len);
    for (i, item) in batch.items().iter().enumerate() {
        if i > 0 {
            buf.put_u8(b'\n');
        }
        buf.put_slice(item.data());
    }
    buf.freeze()
}

pub struct NatsSink {
    jetstream: Context,
    subject: String,
    max_item_bytes: usize,
    max_payload: usize,
    sent: AtomicU64,
}

impl NatsSink {
    /// Wrap an existing client. Limits default to the server's `max_payload`.
    pub fn new(client: async_nats::Client, subject: impl Into<String>) -> Self {
        let max_payload = match client.server_info().max_payload {
            0 => DEFAULT_MAX_PAYLOAD,
            n => n,
        };
        Self {
            jetstream: jetstream::new(client),
            subject: subject.into(),
            max_item_bytes: max_payload,
            max_payload,
            sent: AtomicU64::new(0),
        }
    }

    pub async fn connect(url: &str, subject: impl Into<String>) -> Result<Self, SinkError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| SinkError::Transport(format!("NATS connection failed: {}", e)))?;
        let sink = Self::new(client, subject);
        info!(url = %url, subject = %sink.subject, max_payload = sink.max_payload, "Connected NATS batch sink");
        Ok(sink)
    }

    /// Tighten the per-item limit below the server payload limit
    pub fn with_max_item_bytes(mut self, limit: usize) -> Self {
        self.max_item_bytes = limit.min(self.max_payload);
        self
    }

    /// Create the JetStream stream for the sink subject if it does not exist
    pub async fn ensure_stream(&self, stream_name: &str) -> Result<(), SinkError> {
        let config = jetstream::stream::Config {
            name: stream_name.to_string(),
            subjects: vec![self.subject.clone()],
            storage: jetstream::stream::StorageType::File,
            max_age: std::time::Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| SinkError::Transport(format!("stream creation failed: {}", e)))?;

        info!(stream = %stream_name, subject = %self.subject, "Stream ready");
        Ok(())
    }

    /// Batches acknowledged by the server
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BatchSink for NatsSink {
    fn max_item_bytes(&self) -> Option<usize> {
        Some(self.max_item_bytes)
    }

    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        let body = encode_batch(batch);
        if body.len() > self.max_payload {
            return Err(SinkError::BatchTooLarge {
                batch_id: batch.id(),
                size: body.len(),
                limit: self.max_payload,
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_BATCH_ID, batch.id().to_string());
        headers.insert(HEADER_BATCH_SIZE, batch.len().to_string());

        self.jetstream
            .publish_with_headers(self.subject.clone(), headers, body)
            .await
            .map_err(|e| SinkError::Transport(format!("publish failed: {}", e)))?
            .await
            .map_err(|e| SinkError::Transport(format!("publish ack failed: {}", e)))?;

        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(subject = %self.subject, batch_id = %batch.id(), items = batch.len(), "Published batch");
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        info!(subject = %self.subject, sent = self.sent_count(), "NATS batch sink closed");
        Ok(())
    }
}
