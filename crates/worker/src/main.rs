//! Prompt Relay Worker - Main Entry Point
//!
//! Connects to the shared queue and result store, then runs the configured
//! number of pull loops until interrupted.

use relay_common::metrics::serve_metrics;
use relay_common::{Backend, RelayConfig, RelayError, Result, Role};
use relay_worker::{JobProcessor, OpenAiClient, WorkerPool};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = RelayConfig::load()?;

    // Initialize logging
    let level = &config.observability.log_level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("relay_worker={level},relay_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Prompt Relay Worker");
    config.validate(Role::Worker)?;

    info!(
        "Worker configuration loaded: backend={}, concurrency={}, model={}",
        config.backend.kind, config.worker.concurrency, config.inference.model
    );

    let backend = Backend::connect(&config.backend).await?;

    let client = OpenAiClient::new(&config.inference).map_err(RelayError::from)?;
    if !client.has_credential() {
        warn!("No inference API key configured; every job will fail with an authentication error");
    }

    if let Some(port) = config.worker.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(addr).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let processor = Arc::new(
        JobProcessor::new(backend, Arc::new(client)).with_store_backoff(config.poll_backoff()),
    );
    let pool = WorkerPool::new(processor, &config);
    let mut loops = pool.spawn();

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    info!("Received shutdown signal, finishing in-flight jobs");

    pool.shutdown();
    while let Some(joined) = loops.join_next().await {
        if let Err(e) = joined {
            error!("Worker loop panicked: {}", e);
        }
    }

    info!("Prompt Relay Worker shutdown complete");
    Ok(())
}
