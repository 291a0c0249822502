//! Periodic proxy pool refresh
//!
//! Keeps the endpoint set current against the address source. A failing
//! refresh is logged and the pool keeps serving its existing endpoints.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use crate::outbound::ProxyPool;

/// Pool refresh service configuration
#[derive(Clone)]
pub struct PoolRefreshConfig {
    /// Interval between refreshes
    pub refresh_interval: Duration,
}

impl Default for PoolRefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
        }
    }
}

/// Periodically refreshes the proxy pool from its endpoint source
pub struct PoolRefreshService {
    pool: Arc<ProxyPool>,
    config: PoolRefreshConfig,
}

impl PoolRefreshService {
    pub fn new(pool: Arc<ProxyPool>, config: PoolRefreshConfig) -> Self {
        Self { pool, config }
    }

    /// Run the refresh service (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting pool refresh service with {}s interval",
            self.config.refresh_interval.as_secs()
        );

        let mut refresh_interval = interval(self.config.refresh_interval);
        refresh_interval.tick().await; // The initial refresh happens at startup

        loop {
            tokio::select! {
                _ = refresh_interval.tick() => {
                    match self.pool.refresh().await {
                        Ok(count) => debug!("Pool refresh complete: {} endpoints", count),
                        Err(e) => warn!("Pool refresh failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Pool refresh service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for managing the pool refresh service
pub struct PoolRefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl PoolRefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for PoolRefreshHandle {
    fn default() -> Self {
        Self::new().0
    }
}
