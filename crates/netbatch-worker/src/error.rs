use thiserror::Error;

use netbatch::{PipelineError, SinkError};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}
