//! Gateway HTTP server
//!
//! Serves the OpenAI-compatible surface and the image routes over axum with
//! graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::{Config, ServerConfig};
use crate::error::Result;
use crate::outbound::{Dispatcher, ProxyPool};
use crate::storage::ImageStore;

use super::middleware::cors_layer;
use super::routes;

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub pool: Arc<ProxyPool>,
    pub images: Arc<ImageStore>,
    pub started_at: Instant,
}

/// Gateway server
pub struct GatewayServer {
    config: ServerConfig,
    state: AppState,
}

impl GatewayServer {
    pub fn new(
        config: Arc<Config>,
        dispatcher: Arc<Dispatcher>,
        pool: Arc<ProxyPool>,
        images: Arc<ImageStore>,
    ) -> Self {
        let server_config = config.server.clone();
        let state = AppState {
            config,
            dispatcher,
            pool,
            images,
            started_at: Instant::now(),
        };

        Self {
            config: server_config,
            state,
        }
    }

    /// Build the router
    fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(cors_layer())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until the shutdown signal fires
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| {
                crate::error::GatewayError::InvalidConfig("invalid server address".into())
            })?;

        let router = self.build_router();

        info!("Gateway listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| crate::error::GatewayError::Internal(e.to_string()))?;

        info!("Gateway server shut down");
        Ok(())
    }
}
