use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::PipelineState;

/// Why a sink refused or failed to deliver a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("item {index} of batch {batch_id} is {size} bytes, sink limit is {limit}")]
    Oversized {
        batch_id: Uuid,
        index: usize,
        size: usize,
        limit: usize,
    },
    #[error("batch {batch_id} encodes to {size} bytes, sink limit is {limit}")]
    BatchTooLarge {
        batch_id: Uuid,
        size: usize,
        limit: usize,
    },
    #[error("send failed: {0}")]
    Transport(String),
}

impl SinkError {
    /// True when the batch can never be sent in its current shape, as opposed
    /// to a send that failed in transit.
    pub fn is_unsendable(&self) -> bool {
        matches!(self, SinkError::Oversized { .. } | SinkError::BatchTooLarge { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("pipeline is stopping, message rejected")]
    Stopped,
    #[error("intake queue is full")]
    Full,
}

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("pipeline cannot do that while {0}")]
    InvalidState(PipelineState),

    #[error("dispatch of batch {batch_id} failed: {source}")]
    Dispatch {
        batch_id: Uuid,
        #[source]
        source: SinkError,
    },

    #[error("worker task failed: {0}")]
    Worker(String),
}
