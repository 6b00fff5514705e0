//! Batch sinks: where completed batches are delivered

mod file;
mod memory;
mod nats;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::message::Batch;

pub use file::FileSink;
pub use memory::MemorySink;
pub use nats::{encode_batch, NatsSink};

/// Destination for completed batches (broker, file, ...).
///
/// A batch is delivered whole or not at all. Implementations do not retry;
/// the pipeline's failure policy decides what a failed send means.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Largest single item the sink accepts, if it has a limit
    fn max_item_bytes(&self) -> Option<usize> {
        None
    }

    /// Deliver one batch
    async fn send(&self, batch: &Batch) -> Result<(), SinkError>;

    /// Flush and release resources after the last batch
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
