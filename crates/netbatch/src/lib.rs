//! netbatch: time-windowed message batching pipeline
//!
//! Messages enter through a non-blocking [`Intake`], pass a per-message
//! [`Processor`], are grouped into [`Batch`]es on a fixed wall-clock window and
//! handed to a [`BatchSink`]. [`Pipeline`] owns start-up and the shutdown signal.

pub mod assembly;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod lifecycle;
pub mod message;
pub mod metrics;
pub mod observer;
pub mod pipeline;
pub mod processing;
pub mod queue;
pub mod sink;

pub use config::{parse_duration, FailurePolicy, PipelineConfig};
pub use error::{PipelineError, SinkError, SubmitError};
pub use intake::Intake;
pub use lifecycle::PipelineState;
pub use message::{Batch, Message};
pub use metrics::MetricsObserver;
pub use observer::{Observers, PipelineObserver, Stage, TracingObserver};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineReport, StopHandle};
pub use processing::{DelayProcessor, PassThrough, Processor};
pub use queue::{Pop, PushError, StageQueue};
pub use sink::{BatchSink, FileSink, MemorySink, NatsSink};
