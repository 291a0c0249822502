//! Image generation and serving
//!
//! Image-model requests go through the same resilient dispatcher as chat,
//! against the upstream image endpoint. Results come back as markdown so
//! chat clients render them inline, either as a base64 data URL or as a link
//! into the image store.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::openai::ChatCompletionRequest;
use crate::upstream;

use super::super::server::AppState;
use super::chat::{client_ip, user_agent};

/// Generate an image and respond with markdown
#[instrument(skip(state, request, headers), fields(model = %request.model))]
pub async fn generate(
    state: &AppState,
    request: &ChatCompletionRequest,
    prompt: &str,
    headers: &HeaderMap,
) -> Result<Response> {
    let user_id = upstream::synthesize_user_id(client_ip(headers), user_agent(headers));
    let (width, height) = upstream::parse_size(request.size.as_deref());
    let negative_prompt = request.negative_prompt.as_deref().unwrap_or("");

    let payload = upstream::image_payload(
        &request.model,
        prompt,
        width,
        height,
        negative_prompt,
        &user_id,
    );

    let response = state
        .dispatcher
        .dispatch(
            &state.config.upstream.image_url,
            &payload,
            &upstream::image_headers(&state.config.upstream.version),
        )
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("Upstream image endpoint returned {}: {}", status, body);
        let markdown = format!(
            "# Image generation failed\n\n\
             **Error details:**\n\
             - Status: {}\n\
             - Details: {}\n\n\
             Check the request parameters and try again.",
            status.as_u16(),
            body
        );
        return Ok(markdown_response(status, markdown));
    }

    let data = response
        .bytes()
        .await
        .map_err(|e| GatewayError::TransportFailure(e.to_string()))?;

    if data.is_empty() {
        warn!("Upstream returned an empty image body");
        let markdown = "# Image generation failed\n\n\
             **Error details:**\n\
             - Reason: received empty image data\n\n\
             Please try again later."
            .to_string();
        return Ok(markdown_response(StatusCode::INTERNAL_SERVER_ERROR, markdown));
    }

    let filename = format!("{}.webp", Uuid::new_v4());
    state.images.save(&filename, data.clone()).await;
    info!("Image generated and stored as {}", filename);

    let size = format!("{}x{}", width, height);
    let negative = if negative_prompt.is_empty() {
        "none"
    } else {
        negative_prompt
    };

    let markdown = if state.config.images.return_base64 {
        let data_url = format!("data:image/webp;base64,{}", BASE64.encode(&data));
        format!(
            "![{prompt}]({data_url})\n\n\
             ## Image details\n\n\
             - **Model**: {model}\n\
             - **Prompt**: {prompt}\n\
             - **Size**: {size}\n\
             - **Negative prompt**: {negative}\n",
            prompt = prompt,
            data_url = data_url,
            model = request.model,
            size = size,
            negative = negative,
        )
    } else {
        let url = image_url(state, headers, &filename);
        format!(
            "![{prompt}]({url})\n\n\
             ## Image details\n\n\
             - **Model**: {model}\n\
             - **Prompt**: {prompt}\n\
             - **Size**: {size}\n\
             - **Negative prompt**: {negative}\n\n\
             ## Image link\n\n\
             {url}\n",
            prompt = prompt,
            url = url,
            model = request.model,
            size = size,
            negative = negative,
        )
    };

    Ok(markdown_response(StatusCode::OK, markdown))
}

/// GET /images/:filename
pub async fn serve_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response> {
    // The store is flat; anything path-like is hostile.
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(GatewayError::InvalidRequest("invalid image filename".into()));
    }

    let data = state
        .images
        .load(&filename)
        .await
        .ok_or_else(|| GatewayError::ImageNotFound(filename.clone()))?;

    let max_age = state.config.images.retention.as_secs();

    if params.get("format").map(String::as_str) == Some("base64") {
        let data_url = format!("data:image/webp;base64,{}", BASE64.encode(&data));
        let mut response = Json(json!({
            "dataUrl": data_url,
            "filename": filename,
        }))
        .into_response();
        if let Ok(value) = format!("public, max-age={}", max_age).parse() {
            response.headers_mut().insert(CACHE_CONTROL, value);
        }
        return Ok(response);
    }

    Response::builder()
        .header(CONTENT_TYPE, "image/webp")
        .header(CACHE_CONTROL, format!("public, max-age={}", max_age))
        .body(Body::from(data))
        .map_err(|e| GatewayError::Internal(e.to_string()))
}

/// Absolute URL for a stored image
///
/// Uses the configured base URL when present, otherwise the request Host.
fn image_url(state: &AppState, headers: &HeaderMap, filename: &str) -> String {
    if let Some(base) = &state.config.images.base_url {
        return format!("{}/images/{}", base, filename);
    }

    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("https://{}/images/{}", host, filename)
}

fn markdown_response(status: StatusCode, markdown: String) -> Response {
    (
        status,
        [(CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    )
        .into_response()
}
