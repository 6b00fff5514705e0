//! Batch assembly stage
//!
//! Turns the stream of processed messages into batches on a fixed wall-clock
//! cadence. Each window gets an absolute deadline `start + window`; every pop
//! waits only for the time remaining until that deadline, so a steady trickle
//! of messages cannot keep a window open past its deadline. The longest a
//! message waits for its batch is one window, whatever the arrival pattern.
//!
//! Window ends on:
//! - deadline reached, even with items still queued: flush, start the next window
//! - first stop signal: flush early, keep draining in windows
//! - ready queue complete and empty: flush the remainder, exit
//! - abort: discard the buffer, exit
//!
//! A window that collected nothing produces no batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::message::{Batch, Message};
use crate::observer::{PipelineObserver, Stage};
use crate::queue::{Pop, StageQueue};

/// Items popped back to back before handing the thread back to the runtime
const YIELD_EVERY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowEnd {
    Elapsed,
    Stopped,
    Drained,
    Aborted,
}

pub(crate) struct AssemblyWorker {
    pub(crate) id: usize,
    pub(crate) window: Duration,
    pub(crate) ready: StageQueue<Message>,
    pub(crate) batches: StageQueue<Batch>,
    pub(crate) stop: CancellationToken,
    pub(crate) abort: CancellationToken,
    pub(crate) observer: Arc<dyn PipelineObserver>,
}

impl AssemblyWorker {
    /// Returns the number of batches pushed to the completed-batch queue.
    pub(crate) async fn run(self) -> u64 {
        self.observer.stage_started(Stage::Assembly, self.id);
        let mut stop_seen = false;
        let mut created: u64 = 0;

        loop {
            let deadline = Instant::now() + self.window;
            let (items, end) = self.collect_window(deadline, &mut stop_seen).await;

            if end == WindowEnd::Aborted {
                if !items.is_empty() {
                    warn!(worker = self.id, discarded = items.len(), "Assembly aborted, discarding window");
                }
                break;
            }

            if let Some(batch) = Batch::new(items) {
                self.observer.batch_created(&batch, self.id);
                let pushed = tokio::select! {
                    biased;
                    _ = self.abort.cancelled() => false,
                    result = self.batches.push(batch) => result.is_ok(),
                };
                if !pushed {
                    debug!(worker = self.id, "Batch queue closed, assembly exiting");
                    break;
                }
                created += 1;
            }

            if end == WindowEnd::Drained {
                break;
            }
        }

        self.observer.stage_stopped(Stage::Assembly, self.id);
        created
    }

    /// Collect messages until the window ends. Items are kept in pop order.
    async fn collect_window(
        &self,
        deadline: Instant,
        stop_seen: &mut bool,
    ) -> (Vec<Message>, WindowEnd) {
        let mut items = Vec::new();
        loop {
            // A backlog keeps `pop_until` returning items, so the deadline is
            // checked before every pop rather than left to the timer.
            if Instant::now() >= deadline {
                return (items, WindowEnd::Elapsed);
            }

            let popped = tokio::select! {
                biased;
                _ = self.abort.cancelled() => return (items, WindowEnd::Aborted),
                _ = self.stop.cancelled(), if !*stop_seen => {
                    *stop_seen = true;
                    return (items, WindowEnd::Stopped);
                }
                popped = self.ready.pop_until(deadline) => popped,
            };

            match popped {
                Pop::Item(message) => {
                    items.push(message);
                    if items.len() % YIELD_EVERY == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                Pop::TimedOut => return (items, WindowEnd::Elapsed),
                Pop::Complete => return (items, WindowEnd::Drained),
            }
        }
    }
}
