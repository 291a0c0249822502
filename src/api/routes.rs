//! Route definitions

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::middleware::require_api_key;
use super::server::AppState;

/// Create the gateway router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check and image serving need no API key
        .route("/health", get(handlers::health::health_check))
        .route("/images/:filename", get(handlers::images::serve_image))
        .merge(v1_routes(state.clone()))
        .with_state(state)
}

/// OpenAI-compatible routes, guarded by the API key
fn v1_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/models", get(handlers::models::list_models))
        .route("/v1/chat/completions", post(handlers::chat::completion))
        .route_layer(from_fn_with_state(state, require_api_key))
}
