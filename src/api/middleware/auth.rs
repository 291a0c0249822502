//! Bearer API key authentication

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{GatewayError, Result};

use super::super::server::AppState;

/// Require a matching bearer key on the request
///
/// An empty configured key disables the check entirely.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let expected = &state.config.server.api_key;
    if expected.is_empty() {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(GatewayError::MissingAuthHeader)?;

    let presented = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(GatewayError::InvalidApiKey)?;

    if presented != expected {
        return Err(GatewayError::InvalidApiKey);
    }

    Ok(next.run(request).await)
}
