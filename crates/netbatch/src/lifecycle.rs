//! Lifecycle state and the shutdown signals shared by every stage
//!
//! `NotStarted -> Running -> Stopping -> Stopped`, never backwards. Two
//! cancellation tokens fan out to the workers:
//! - `stop`: graceful; stages drain what is already queued, then exit
//! - `abort`: fatal; stages exit at their next blocking point and queued work
//!   is discarded. Abort always implies stop.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::message::Message;
use crate::observer::{PipelineObserver, Stage};
use crate::queue::StageQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::NotStarted => "not_started",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        }
    }

    /// Numeric form for gauges
    pub fn code(&self) -> i64 {
        match self {
            PipelineState::NotStarted => 0,
            PipelineState::Running => 1,
            PipelineState::Stopping => 2,
            PipelineState::Stopped => 3,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct Lifecycle {
    state: watch::Sender<PipelineState>,
    stop: CancellationToken,
    abort: CancellationToken,
    /// First fatal error; later ones are logged and dropped
    failure: Mutex<Option<PipelineError>>,
    /// Closed on stop so intake refuses new messages
    intake: StageQueue<Message>,
    observer: Arc<dyn PipelineObserver>,
}

impl Lifecycle {
    pub(crate) fn new(intake: StageQueue<Message>, observer: Arc<dyn PipelineObserver>) -> Self {
        let (state, _) = watch::channel(PipelineState::NotStarted);
        Self {
            state,
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            failure: Mutex::new(None),
            intake,
            observer,
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub(crate) fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// `NotStarted -> Running`. Any other starting state is refused.
    pub(crate) fn begin(&self) -> Result<(), PipelineError> {
        let mut refused = None;
        self.state.send_if_modified(|state| {
            if *state == PipelineState::NotStarted {
                *state = PipelineState::Running;
                true
            } else {
                refused = Some(*state);
                false
            }
        });
        match refused {
            Some(state) => Err(PipelineError::InvalidState(state)),
            None => {
                self.observer.state_changed(PipelineState::Running);
                self.observer.stage_started(Stage::Intake, 0);
                Ok(())
            }
        }
    }

    /// Begin a graceful stop. Idempotent and callable from any thread.
    ///
    /// Returns true only for the call that performed the transition. A
    /// pipeline that was never started goes straight to `Stopped`.
    pub(crate) fn request_stop(&self) -> bool {
        let mut next = None;
        self.state.send_if_modified(|state| {
            let target = match *state {
                PipelineState::NotStarted => PipelineState::Stopped,
                PipelineState::Running => PipelineState::Stopping,
                PipelineState::Stopping | PipelineState::Stopped => return false,
            };
            *state = target;
            next = Some(target);
            true
        });

        let Some(next) = next else {
            return false;
        };

        self.intake.mark_complete();
        self.stop.cancel();
        if next == PipelineState::Stopping {
            self.observer.stage_stopped(Stage::Intake, 0);
        }
        self.observer.state_changed(next);
        info!(state = %next, pending = self.intake.len(), "Stop requested");
        true
    }

    /// Record a fatal error and abort every stage.
    pub(crate) fn fail(&self, error: PipelineError) {
        {
            let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if failure.is_none() {
                *failure = Some(error);
            } else {
                warn!(error = %error, "Additional fatal error after pipeline already failed");
            }
        }
        self.abort.cancel();
        self.request_stop();
    }

    pub(crate) fn failure(&self) -> Option<PipelineError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `Stopping -> Stopped`, once every worker has exited.
    pub(crate) fn finish(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == PipelineState::Stopped {
                return false;
            }
            *state = PipelineState::Stopped;
            true
        });
        if changed {
            self.observer.state_changed(PipelineState::Stopped);
        }
    }
}
