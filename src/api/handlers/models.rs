//! Model listing endpoint

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::openai::models_response;

use super::super::server::AppState;

/// OpenAI-compatible /v1/models listing
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    Json(models_response(&state.config.upstream.image_models))
}
