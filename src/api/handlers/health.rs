//! Health check endpoint

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use super::super::server::AppState;

/// Health check with pool visibility
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "gondola",
            "pool_endpoints": state.pool.len(),
            "uptime_secs": state.started_at.elapsed().as_secs(),
        })),
    )
}
