//! netbatch-worker: runs a netbatch pipeline as a service
//!
//! Reads a YAML config, feeds the pipeline from a generator or a NATS
//! subject, ships batches to NATS JetStream or date-partitioned JSONL files,
//! and exposes health and Prometheus endpoints.

pub mod config;
pub mod error;
pub mod server;
pub mod source;

pub use config::Config;
pub use error::WorkerError;
