use std::sync::Arc;

use anyhow::{Context, Result};
use jobline_client::ClientConfig;
use jobline_worker::telemetry::{init_tracing, TelemetryConfig};
use jobline_worker::{
    handler_fn, HttpQueueBackend, JobContext, JobProgress, WorkerConfig, WorkerRuntime,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - LOG_FORMAT: "json" or "text"
    init_tracing(TelemetryConfig::from_env());

    let client_config = ClientConfig::from_env();
    let worker_config = WorkerConfig::from_env();

    tracing::info!(
        base_url = %client_config.base_url,
        queue = %worker_config.queue,
        concurrency = worker_config.concurrency,
        "jobline-worker starting"
    );

    let backend = HttpQueueBackend::from_config(&client_config)
        .context("Failed to build queue client")?;

    let shutdown = CancellationToken::new();
    let runtime = WorkerRuntime::with_parent(
        Arc::new(backend),
        handler_fn(echo),
        worker_config,
        &shutdown,
    );
    runtime.on_event(|event| tracing::debug!(event = event.name(), "Worker event"));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Received shutdown signal");
        signal.cancel();
    });

    runtime.run().await.context("Worker failed")?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}

/// Echo the payload back as the job result
async fn echo(ctx: JobContext) -> jobline_worker::JobResult {
    tracing::info!(job_id = ctx.job_id(), job_type = ctx.job_type(), "Echoing job");
    ctx.report_progress(JobProgress::percent(100.0)).await?;
    Ok(json!({
        "job_type": ctx.job_type(),
        "attempt": ctx.attempt(),
        "payload": ctx.payload(),
    }))
}
