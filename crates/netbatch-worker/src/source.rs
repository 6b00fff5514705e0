//! Message sources feeding the pipeline intake

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use netbatch::{Intake, SubmitError};

use crate::config::SourceConfig;
use crate::error::WorkerError;

/// Event emitted by the generator source
#[derive(Debug, Serialize)]
pub struct GeneratedEvent {
    pub id: Uuid,
    pub date: DateTime<Utc>,
}

impl GeneratedEvent {
    pub fn now() -> Self {
        Self {
            id: Uuid::new_v4(),
            date: Utc::now(),
        }
    }
}

/// Run the configured source until shutdown, the intake closes or the source
/// is exhausted. Returns the number of messages accepted.
pub async fn run_source(
    config: SourceConfig,
    intake: Intake,
    shutdown: CancellationToken,
) -> Result<u64, WorkerError> {
    match config {
        SourceConfig::Generator { interval, limit } => {
            run_generator(intake, interval, limit, shutdown).await
        }
        SourceConfig::Nats { url, subject } => run_nats(&url, &subject, intake, shutdown).await,
    }
}

pub async fn run_generator(
    intake: Intake,
    interval: Duration,
    limit: Option<u64>,
    shutdown: CancellationToken,
) -> Result<u64, WorkerError> {
    info!(interval_ms = interval.as_millis() as u64, limit = ?limit, "Generator source started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut accepted = 0u64;

    while intake.is_open() {
        if limit.is_some_and(|limit| accepted >= limit) {
            info!(accepted, "Generator limit reached");
            break;
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let payload = serde_json::to_vec(&GeneratedEvent::now())?;
        if !submit(&intake, payload, &mut accepted) {
            break;
        }
    }

    info!(accepted, "Generator source stopped");
    Ok(accepted)
}

pub async fn run_nats(
    url: &str,
    subject: &str,
    intake: Intake,
    shutdown: CancellationToken,
) -> Result<u64, WorkerError> {
    let client = async_nats::connect(url)
        .await
        .map_err(|e| WorkerError::Nats(e.to_string()))?;
    let mut subscriber = client
        .subscribe(subject.to_string())
        .await
        .map_err(|e| WorkerError::Nats(format!("Failed to subscribe: {}", e)))?;

    info!(url = %url, subject = %subject, "NATS source subscribed");
    let mut accepted = 0u64;

    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = subscriber.next() => match next {
                Some(message) => message,
                None => {
                    warn!(subject = %subject, "NATS subscription closed");
                    break;
                }
            },
        };

        if !submit(&intake, message.payload, &mut accepted) {
            break;
        }
    }

    if let Err(e) = subscriber.unsubscribe().await {
        debug!(error = %e, "Unsubscribe failed");
    }
    info!(accepted, "NATS source stopped");
    Ok(accepted)
}

/// Returns false once the pipeline no longer accepts messages
fn submit(intake: &Intake, payload: impl Into<Bytes>, accepted: &mut u64) -> bool {
    match intake.submit(payload) {
        Ok(()) => {
            *accepted += 1;
            true
        }
        Err(SubmitError::Stopped) => {
            info!("Pipeline stopped accepting messages");
            false
        }
        Err(SubmitError::Full) => {
            warn!("Intake full, message dropped");
            true
        }
    }
}
