use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use netbatch::config::deserialize_duration;
use netbatch::{BatchSink, FileSink, MemorySink, NatsSink, PipelineConfig};

use crate::error::WorkerError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub server: ServerConfig,
}

/// Where messages come from
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Emit a small JSON event on a fixed interval
    Generator {
        #[serde(
            default = "default_generator_interval",
            deserialize_with = "deserialize_duration"
        )]
        interval: Duration,
        /// Stop after this many messages
        #[serde(default)]
        limit: Option<u64>,
    },
    /// Submit every message published on a core NATS subject
    Nats { url: String, subject: String },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Generator {
            interval: default_generator_interval(),
            limit: None,
        }
    }
}

fn default_generator_interval() -> Duration {
    Duration::from_millis(100)
}

/// Where batches go
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Nats {
        url: String,
        subject: String,
        /// JetStream stream to create for `subject` if missing
        #[serde(default)]
        stream: Option<String>,
        #[serde(default)]
        max_item_bytes: Option<usize>,
    },
    File {
        path: PathBuf,
        #[serde(default = "default_file_name")]
        name: String,
        #[serde(default)]
        max_item_bytes: Option<usize>,
    },
    /// Counts batches and keeps none of them; for dry runs
    Memory {
        #[serde(default)]
        max_item_bytes: Option<usize>,
    },
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::File {
            path: PathBuf::from("./batches"),
            name: default_file_name(),
            max_item_bytes: None,
        }
    }
}

fn default_file_name() -> String {
    "batches".to_string()
}

impl SinkConfig {
    /// Build the configured sink, connecting to NATS if needed
    pub async fn connect(&self) -> Result<Arc<dyn BatchSink>, WorkerError> {
        let sink: Arc<dyn BatchSink> = match self {
            SinkConfig::Nats {
                url,
                subject,
                stream,
                max_item_bytes,
            } => {
                let mut sink = NatsSink::connect(url, subject.clone()).await?;
                if let Some(limit) = max_item_bytes {
                    sink = sink.with_max_item_bytes(*limit);
                }
                if let Some(stream) = stream {
                    sink.ensure_stream(stream).await?;
                }
                Arc::new(sink)
            }
            SinkConfig::File {
                path,
                name,
                max_item_bytes,
            } => {
                info!(path = ?path, name = %name, "Using file batch sink");
                let sink = FileSink::new(path.clone(), name.clone());
                Arc::new(match max_item_bytes {
                    Some(limit) => sink.with_max_item_bytes(*limit),
                    None => sink,
                })
            }
            SinkConfig::Memory { max_item_bytes } => {
                info!("Using counting batch sink");
                let sink = MemorySink::counting();
                Arc::new(match max_item_bytes {
                    Some(limit) => sink.with_max_item_bytes(*limit),
                    None => sink,
                })
            }
        };
        Ok(sink)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, WorkerError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| WorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorkerError> {
        self.pipeline.validate()?;
        if let SourceConfig::Generator { interval, .. } = &self.source {
            if interval.is_zero() {
                return Err(WorkerError::Config(
                    "generator interval must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}
