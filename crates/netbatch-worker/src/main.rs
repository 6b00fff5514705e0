//! netbatch-worker binary entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netbatch::{MetricsObserver, Observers, Pipeline, PipelineState, TracingObserver};
use netbatch_worker::server::{run_server, ServerState};
use netbatch_worker::source::run_source;
use netbatch_worker::Config;

#[derive(Parser, Debug)]
#[command(name = "netbatch-worker")]
#[command(about = "Time-windowed message batching worker")]
struct Args {
    /// Path to worker configuration file; built-in defaults when omitted
    #[arg(short, long, env = "NETBATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "NETBATCH_JSON_LOGS")]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    info!(
        source = ?config.source,
        sink = ?config.sink,
        listen_addr = %config.server.listen_addr,
        "Starting netbatch worker"
    );

    let sink = config.sink.connect().await.context("Failed to create sink")?;
    let observer = Observers::new()
        .with(Arc::new(TracingObserver))
        .with(Arc::new(MetricsObserver));
    let pipeline = Pipeline::builder(sink)
        .config(config.pipeline.clone())
        .observer(Arc::new(observer))
        .build()?;
    pipeline.start()?;

    let server_shutdown = CancellationToken::new();
    let server = tokio::spawn(run_server(
        config.server.listen_addr,
        ServerState::new(pipeline.watch_state()),
        server_shutdown.clone(),
    ));

    let mut source = tokio::spawn(run_source(
        config.source.clone(),
        pipeline.intake(),
        pipeline.stop_token(),
    ));

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut states = pipeline.watch_state();

    info!("Worker running, waiting for SIGTERM/SIGINT to stop");

    let mut source_done = false;
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, shutting down gracefully"),
        _ = sigint.recv() => info!("SIGINT received, shutting down gracefully"),
        _ = async {
            let _ = states.wait_for(|s| *s != PipelineState::Running).await;
        } => {
            warn!("Pipeline stopped on its own, shutting down");
        }
        result = &mut source => {
            source_done = true;
            match result {
                Ok(Ok(accepted)) => info!(accepted, "Source finished, draining pipeline"),
                Ok(Err(e)) => error!(error = %e, "Source failed, draining pipeline"),
                Err(e) => error!(error = %e, "Source task panicked, draining pipeline"),
            }
        }
    }

    pipeline.request_stop();
    let result = pipeline.wait().await;

    if !source_done {
        match source.await {
            Ok(Ok(accepted)) => info!(accepted, "Source shutdown complete"),
            Ok(Err(e)) => error!(error = %e, "Source failed during shutdown"),
            Err(e) => error!(error = %e, "Source task panicked during shutdown"),
        }
    }

    server_shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Health server failed"),
        Err(e) => error!(error = %e, "Health server task panicked"),
    }

    match result {
        Ok(report) => {
            info!(
                processed = report.messages_processed,
                batches = report.batches_delivered,
                failed = report.batches_failed,
                "Worker shutdown complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            Err(e.into())
        }
    }
}
