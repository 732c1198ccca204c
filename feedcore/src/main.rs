#![deny(clippy::pedantic, clippy::all, clippy::nursery)]

mod config;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use config::FeedcoreConfig;
use feedcore_common::{internal, Signal, ServiceName, SystemClock};
use feedcore_delivery::WebhookDeliverer;
use feedcore_health::{HealthChecker, HealthServer};
use feedcore_orchestrator::Orchestrator;
use feedcore_queue::PriorityQueue;
use feedcore_resilience::{ErrorHandler, RetryPolicy, ServiceErrorConfig};
use feedcore_source::SourceClient;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "feedcore", about = "Feed ingestion, classification, and webhook delivery pipeline")]
struct Cli {
    /// Path to the TOML configuration file. Takes precedence over
    /// `FEEDCORE_CONFIG` and the default search path.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Locate the configuration file using the following precedence:
/// 1. `--config`
/// 2. `FEEDCORE_CONFIG` environment variable
/// 3. `./feedcore.toml` (current working directory)
/// 4. `/etc/feedcore/feedcore.toml` (system-wide config)
fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        anyhow::ensure!(path.exists(), "--config points to a non-existent file: {}", path.display());
        return Ok(path);
    }

    if let Ok(env_path) = std::env::var("FEEDCORE_CONFIG") {
        let path = PathBuf::from(env_path);
        anyhow::ensure!(
            path.exists(),
            "FEEDCORE_CONFIG points to a non-existent file: {}",
            path.display()
        );
        return Ok(path);
    }

    let default_paths = [PathBuf::from("./feedcore.toml"), PathBuf::from("/etc/feedcore/feedcore.toml")];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    anyhow::bail!("no configuration file found at the default search paths")
}

/// Load configuration from the resolved file, or fall back to in-code
/// defaults when no file is found (the reader endpoint and webhook URL are
/// then empty, so the pipeline will sit idle and unready until configured).
fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<FeedcoreConfig> {
    match find_config_file(explicit) {
        Ok(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config from {}", path.display()))?;
            let config: FeedcoreConfig =
                toml::from_str(&content).with_context(|| format!("failed to parse config at {}", path.display()))?;
            tracing::info!(path = %path.display(), "loaded configuration");
            Ok(config)
        }
        Err(e) => {
            tracing::warn!(error = %e, "no configuration file found; using in-code defaults");
            Ok(FeedcoreConfig::default())
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => internal!(level = INFO, "ctrl-c received, shutting down"),
            _ = terminate.recv() => internal!(level = INFO, "SIGTERM received, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        internal!(level = INFO, "ctrl-c received, shutting down");
    }
}

/// Periodically mirror live queue size and breaker state into the
/// [`HealthChecker`] so `/readyz` reflects reality without the Orchestrator
/// needing to know the health server exists.
async fn health_sync_loop(
    queue: Arc<PriorityQueue<SystemClock>>,
    error_handler: Arc<ErrorHandler>,
    checker: Arc<HealthChecker>,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    let mut timer = tokio::time::interval(Duration::from_secs(1));
    let source = ServiceName::new(feedcore_source::SERVICE_NAME);
    let delivery = ServiceName::new(feedcore_delivery::SERVICE_NAME);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                checker.set_queue_size(queue.size() as u64);
                checker.set_source_ready(error_handler.can_proceed(&source));
                checker.set_delivery_ready(error_handler.can_proceed(&delivery));
            }
            signal = shutdown.recv() => {
                match signal {
                    Ok(Signal::Shutdown | Signal::Finalised) | Err(_) => break,
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    feedcore_common::logging::init();

    let config = load_config(cli.config)?;
    internal!(level = INFO, "feedcore starting");

    let error_handler = Arc::new(ErrorHandler::new());
    error_handler.configure_service(
        &ServiceName::new(feedcore_source::SERVICE_NAME),
        ServiceErrorConfig {
            breaker: config.breakers.source,
            retry_policy: RetryPolicy::default(),
        },
    );
    error_handler.configure_service(
        &ServiceName::new(feedcore_delivery::SERVICE_NAME),
        ServiceErrorConfig {
            breaker: config.breakers.delivery,
            retry_policy: RetryPolicy::default(),
        },
    );

    let queue = Arc::new(PriorityQueue::with_dedup_window(config.queue.capacity, config.queue.dedup_window()));
    let source = SourceClient::new(config.source, error_handler.clone());
    let deliverer = WebhookDeliverer::new(config.webhook, error_handler.clone());

    let orchestrator = Orchestrator::new(
        source,
        deliverer,
        queue.clone(),
        config.classifier,
        error_handler.clone(),
        config.orchestrator,
    );

    let health_checker = Arc::new(HealthChecker::new(config.health.max_queue_size));
    let health_server = if config.health.enabled {
        Some(
            HealthServer::new(config.health, health_checker.clone())
                .await
                .context("failed to start health server")?,
        )
    } else {
        None
    };

    let (shutdown_tx, _) = broadcast::channel::<Signal>(16);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(Signal::Shutdown);
    });

    tokio::join!(
        orchestrator.serve(shutdown_tx.subscribe()),
        async {
            if let Some(server) = health_server {
                if let Err(e) = server.serve(shutdown_tx.subscribe()).await {
                    tracing::error!(error = %e, "health server exited with an error");
                }
            }
        },
        health_sync_loop(queue, error_handler, health_checker, shutdown_tx.subscribe()),
    );

    internal!(level = INFO, "feedcore shutdown complete");
    Ok(())
}
