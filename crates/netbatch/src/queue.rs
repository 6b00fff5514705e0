//! Stage queue: the hand-off between two adjacent pipeline stages
//!
//! Multi-producer, multi-consumer. Every item is received by exactly one
//! consumer. Bounded queues make `push` wait while full, which is how
//! back-pressure reaches the producing stage. `mark_complete` stops further
//! pushes; items already queued can still be popped, and `pop` reports
//! completion only once the queue is both complete and empty.

use async_channel::{Receiver, Sender, TrySendError};
use tokio::time::{timeout_at, Instant};

/// Outcome of a deadline-bounded pop
#[derive(Debug, PartialEq, Eq)]
pub enum Pop<T> {
    Item(T),
    TimedOut,
    /// Marked complete and fully drained
    Complete,
}

/// Non-blocking push refusal. The rejected item is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    Full(T),
    Complete(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Complete(item) => item,
        }
    }
}

pub struct StageQueue<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for StageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> StageQueue<T> {
    pub fn unbounded(name: &'static str) -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { name, tx, rx }
    }

    /// Capacity must be non-zero (checked by `PipelineConfig::validate`).
    pub fn bounded(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity);
        Self { name, tx, rx }
    }

    pub fn with_capacity(name: &'static str, capacity: Option<usize>) -> Self {
        match capacity {
            Some(capacity) => Self::bounded(name, capacity),
            None => Self::unbounded(name),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Push, waiting for room if the queue is bounded and full.
    /// Returns the item back if the queue has been marked complete.
    pub async fn push(&self, item: T) -> Result<(), T> {
        self.tx.send(item).await.map_err(|e| e.into_inner())
    }

    /// Push without waiting.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => PushError::Full(item),
            TrySendError::Closed(item) => PushError::Complete(item),
        })
    }

    /// Wait for the next item. `None` once complete and drained.
    pub async fn pop(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    /// Take the next item if one is queued right now.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next item until an absolute deadline.
    ///
    /// An item that is already queued is returned even if the deadline has
    /// passed.
    pub async fn pop_until(&self, deadline: Instant) -> Pop<T> {
        match timeout_at(deadline, self.rx.recv()).await {
            Ok(Ok(item)) => Pop::Item(item),
            Ok(Err(_)) => Pop::Complete,
            Err(_) => Pop::TimedOut,
        }
    }

    /// Refuse further pushes. Returns true only for the call that completed it.
    pub fn mark_complete(&self) -> bool {
        self.tx.close()
    }

    pub fn is_complete(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.tx.capacity()
    }
}
