//! Intake stage: the non-blocking entry point for external message sources

use std::sync::Arc;

use bytes::Bytes;

use crate::error::SubmitError;
use crate::message::Message;
use crate::observer::PipelineObserver;
use crate::queue::{PushError, StageQueue};

/// Cloneable submit handle. Safe to use from any number of tasks or threads.
///
/// `submit` never waits on downstream work. Once the pipeline is stopping the
/// intake queue is complete and every submit returns [`SubmitError::Stopped`].
#[derive(Clone)]
pub struct Intake {
    queue: StageQueue<Message>,
    observer: Arc<dyn PipelineObserver>,
}

impl Intake {
    pub(crate) fn new(queue: StageQueue<Message>, observer: Arc<dyn PipelineObserver>) -> Self {
        Self { queue, observer }
    }

    /// Enqueue a raw payload
    pub fn submit(&self, payload: impl Into<Bytes>) -> Result<(), SubmitError> {
        self.enqueue(Message::new(payload))
    }

    /// Enqueue an already-built message
    pub fn enqueue(&self, message: Message) -> Result<(), SubmitError> {
        let bytes = message.len();
        match self.queue.try_push(message) {
            Ok(()) => {
                self.observer.message_submitted(bytes);
                Ok(())
            }
            Err(PushError::Complete(_)) => Err(SubmitError::Stopped),
            Err(PushError::Full(_)) => Err(SubmitError::Full),
        }
    }

    /// Messages waiting for a processing worker
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_open(&self) -> bool {
        !self.queue.is_complete()
    }
}
