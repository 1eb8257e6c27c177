//! Prompt Relay Gateway - Main Entry Point
//!
//! Serves the HTTP surface. With `gateway.embedded_workers` set, it also runs
//! worker loops in-process, which is how the memory backend is used.

use relay_common::{Backend, RelayConfig, RelayError, Result, Role};
use relay_gateway::{serve, AppState};
use relay_worker::{JobProcessor, OpenAiClient, WorkerPool};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(RelayConfig::load()?);

    // Initialize logging
    let level = &config.observability.log_level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "relay_gateway={level},relay_worker={level},relay_common={level},tower_http={level}"
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Prompt Relay Gateway");
    config.validate(Role::Gateway)?;

    info!(
        "Gateway configuration loaded: backend={}, bind={}, embedded_workers={}",
        config.backend.kind,
        config.listen_address(),
        config.gateway.embedded_workers
    );

    let backend = Backend::connect(&config.backend).await?;

    // Embedded workers
    let embedded = if config.gateway.embedded_workers > 0 {
        let client = OpenAiClient::new(&config.inference).map_err(RelayError::from)?;
        if !client.has_credential() {
            warn!("No inference API key configured; every job will fail with an authentication error");
        }

        let processor = Arc::new(
            JobProcessor::new(backend.clone(), Arc::new(client))
                .with_store_backoff(config.poll_backoff()),
        );
        let workers = WorkerPool::new(processor, &config)
            .with_concurrency(config.gateway.embedded_workers);
        let loops = workers.spawn();
        Some((workers, loops))
    } else {
        None
    };

    let state = AppState::new(backend, config.clone());
    serve(state, async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal");
    })
    .await?;

    if let Some((pool, mut loops)) = embedded {
        info!("Waiting for embedded workers to finish in-flight jobs");
        pool.shutdown();
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!("Worker loop panicked: {}", e);
            }
        }
    }

    info!("Prompt Relay Gateway shutdown complete");
    Ok(())
}
