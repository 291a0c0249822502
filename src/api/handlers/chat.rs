//! Chat completion endpoint
//!
//! Chat models stream or collect the upstream NDJSON body; image models are
//! diverted to the image generation flow.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use tracing::{debug, instrument};

use crate::error::{GatewayError, Result};
use crate::openai::{completion_response, sse_frame, ChatCompletionRequest};
use crate::outbound::{collect_content, FragmentStream};
use crate::upstream;

use super::super::server::AppState;
use super::images;

/// Apparent caller address, for upstream identity synthesis only
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
}

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get("user-agent").and_then(|v| v.to_str().ok())
}

/// POST /v1/chat/completions
#[instrument(skip(state, headers, request), fields(model = %request.model, stream = request.stream))]
pub async fn completion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response> {
    if state.config.upstream.is_image_model(&request.model) {
        debug!("Routing request to the image flow");
        let prompt = request.last_user_content().ok_or_else(|| {
            GatewayError::InvalidRequest(
                "image generation requires a text prompt in the last user message".into(),
            )
        })?;
        return images::generate(&state, &request, prompt, &headers).await;
    }

    chat_completion(&state, &request, &headers).await
}

async fn chat_completion(
    state: &AppState,
    request: &ChatCompletionRequest,
    headers: &HeaderMap,
) -> Result<Response> {
    let user_id = upstream::synthesize_user_id(client_ip(headers), user_agent(headers));
    let payload = upstream::chat_payload(
        &request.model,
        &request.messages,
        request.temperature,
        request.top_p,
        &user_id,
    );

    let response = state
        .dispatcher
        .dispatch(
            &state.config.upstream.chat_url,
            &payload,
            &upstream::chat_headers(),
        )
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::UpstreamError {
            status: status.as_u16(),
            body,
        });
    }

    if request.stream {
        let model = request.model.clone();
        let frames = FragmentStream::new(response.bytes_stream())
            .map(move |fragment| Ok::<_, Infallible>(sse_frame(&model, &fragment)));

        Response::builder()
            .header(CONTENT_TYPE, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(frames))
            .map_err(|e| GatewayError::Internal(e.to_string()))
    } else {
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::TransportFailure(e.to_string()))?;
        let content = collect_content(&text)?;
        Ok(Json(completion_response(&request.model, &content)).into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        assert_eq!(client_ip(&headers), Some("10.0.0.1"));

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers), Some("10.0.0.2"));

        headers.remove("x-real-ip");
        assert_eq!(client_ip(&headers), None);
    }
}
