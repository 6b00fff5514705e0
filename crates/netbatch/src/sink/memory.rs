use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SinkError;
use crate::message::Batch;
use crate::sink::BatchSink;

/// In-memory sink for tests and dry runs.
///
/// [`MemorySink::new`] keeps every delivered batch. [`MemorySink::counting`]
/// only counts them, so memory stays flat in a long-running dry run.
pub struct MemorySink {
    delivered: Mutex<Vec<Batch>>,
    retain: bool,
    attempts: AtomicUsize,
    delivered_count: AtomicUsize,
    max_item_bytes: Option<usize>,
    /// When set, every send fails with this reason
    failure: Mutex<Option<String>>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            retain: true,
            attempts: AtomicUsize::new(0),
            delivered_count: AtomicUsize::new(0),
            max_item_bytes: None,
            failure: Mutex::new(None),
        }
    }

    /// Count delivered batches without keeping them
    pub fn counting() -> Self {
        Self {
            retain: false,
            ..Self::new()
        }
    }

    pub fn with_max_item_bytes(mut self, limit: usize) -> Self {
        self.max_item_bytes = Some(limit);
        self
    }

    /// Fail every send with a transport error
    pub fn failing(self, reason: impl Into<String>) -> Self {
        self.set_failure(Some(reason.into()));
        self
    }

    pub fn set_failure(&self, reason: Option<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = reason;
    }

    /// Number of `send` calls that reached the sink
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of batches delivered, retained or not
    pub fn delivered_count(&self) -> usize {
        self.delivered_count.load(Ordering::SeqCst)
    }

    /// Successfully delivered batches, in delivery order. Always empty for a
    /// counting sink.
    pub fn batches(&self) -> Vec<Batch> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Payloads of every delivered item, flattened in delivery order
    pub fn delivered_items(&self) -> Vec<Bytes> {
        self.batches()
            .iter()
            .flat_map(|b| b.items().iter().map(|m| m.data().clone()))
            .collect()
    }
}

#[async_trait]
impl BatchSink for MemorySink {
    fn max_item_bytes(&self) -> Option<usize> {
        self.max_item_bytes
    }

    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(SinkError::Transport(reason));
        }

        self.delivered_count.fetch_add(1, Ordering::SeqCst);
        if self.retain {
            self.delivered
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(batch.clone());
        }
        Ok(())
    }
}
