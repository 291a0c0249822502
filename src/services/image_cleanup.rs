//! Periodic image store cleanup

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use crate::storage::ImageStore;

/// Image cleanup service configuration
#[derive(Clone)]
pub struct ImageCleanupConfig {
    /// How often to sweep the store
    pub sweep_interval: Duration,
}

impl Default for ImageCleanupConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// Periodically sweeps expired images from the store
pub struct ImageCleanupService {
    store: Arc<ImageStore>,
    config: ImageCleanupConfig,
}

impl ImageCleanupService {
    pub fn new(store: Arc<ImageStore>, config: ImageCleanupConfig) -> Self {
        Self { store, config }
    }

    /// Run the cleanup service (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting image cleanup service with {}s interval",
            self.config.sweep_interval.as_secs()
        );

        let mut sweep_interval = interval(self.config.sweep_interval);
        sweep_interval.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    match self.store.sweep().await {
                        Ok(0) => debug!("Image sweep found nothing to remove"),
                        Ok(removed) => info!("Image sweep removed {} expired images", removed),
                        Err(e) => error!("Image sweep failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Image cleanup service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for managing the image cleanup service
pub struct ImageCleanupHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ImageCleanupHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for ImageCleanupHandle {
    fn default() -> Self {
        Self::new().0
    }
}
