//! Gondola gateway - Entry point
//!
//! Starts the gateway server plus its background services with graceful
//! shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod error;
mod openai;
mod outbound;
mod services;
mod storage;
mod upstream;

use api::GatewayServer;
use config::Config;
use outbound::{DispatchConfig, Dispatcher, HttpAddressSource, ProxyPool};
use services::{
    ImageCleanupConfig, ImageCleanupHandle, ImageCleanupService, PoolRefreshConfig,
    PoolRefreshHandle, PoolRefreshService,
};
use storage::ImageStore;

#[tokio::main]
async fn main() -> error::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gondola=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gondola gateway");

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    info!("Configuration loaded");

    if config.server.api_key.is_empty() {
        warn!("GONDOLA_API_KEY is empty; the /v1 surface is unauthenticated");
    }

    // Build the proxy pool and run the initial refresh
    let source = Arc::new(HttpAddressSource::new(config.pool.source_url.clone()));
    let pool = Arc::new(ProxyPool::new(source, config.pool.ports.clone()));
    match pool.refresh().await {
        Ok(count) => info!("Initial pool refresh: {} endpoints", count),
        Err(e) => warn!(
            "Initial pool refresh failed ({}); dispatches will fail until a refresh succeeds",
            e
        ),
    }

    // Outbound dispatcher
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        DispatchConfig {
            max_attempts: config.pool.max_attempts,
            connect_timeout: config.pool.connect_timeout,
            read_timeout: config.pool.read_timeout,
            ..DispatchConfig::default()
        },
    ));

    // Image store
    let mut images = ImageStore::new(&config.images);
    images.ensure_dir().await;
    let images = Arc::new(images);

    // Start the pool refresh service
    let (refresh_handle, refresh_shutdown) = PoolRefreshHandle::new();
    let refresh_service = PoolRefreshService::new(
        pool.clone(),
        PoolRefreshConfig {
            refresh_interval: config.pool.refresh_interval,
        },
    );
    let refresh_task = tokio::spawn(async move {
        refresh_service.run(refresh_shutdown).await;
    });

    // Start the image cleanup service
    let (cleanup_handle, cleanup_shutdown) = ImageCleanupHandle::new();
    let cleanup_service = ImageCleanupService::new(
        images.clone(),
        ImageCleanupConfig {
            sweep_interval: config.images.retention,
        },
    );
    let cleanup_task = tokio::spawn(async move {
        cleanup_service.run(cleanup_shutdown).await;
    });

    // Start the gateway server
    let (shutdown_tx, _) = watch::channel(false);
    let server = GatewayServer::new(config.clone(), dispatcher, pool, images);
    let server_shutdown = shutdown_tx.subscribe();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(server_shutdown).await {
            error!("Gateway server error: {}", e);
        }
    });

    info!(
        "Gateway started on {}:{}",
        config.server.host, config.server.port
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    refresh_handle.shutdown();
    cleanup_handle.shutdown();

    let _ = tokio::join!(server_task, refresh_task, cleanup_task);

    info!("Gondola gateway stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
