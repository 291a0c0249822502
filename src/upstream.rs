//! Upstream request shaping
//!
//! Builds the payloads and headers the upstream inference API expects. The
//! dispatch core never constructs these; it only moves them.

use http::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN, REFERER};
use rand::Rng;
use serde_json::{json, Value};
use uuid::Uuid;

/// First 8 characters of a fresh UUID, used for request and message IDs
pub fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// 32-bit accumulating string hash, rendered as hex
fn fingerprint_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for ch in input.chars() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(ch as i32);
    }
    format!("{:x}", hash.unsigned_abs())
}

/// Synthesize a per-request user ID
///
/// Derived from the caller's apparent address and user agent plus time and
/// randomness, so consecutive requests never share an identity upstream.
pub fn synthesize_user_id(client_ip: Option<&str>, user_agent: Option<&str>) -> String {
    let random: u32 = rand::thread_rng().gen_range(0..1_000_000);
    let random_id = short_id();

    match (client_ip, user_agent) {
        (None, None) => format!("user_anon_{}_{}", random_id, random),
        (ip, ua) => {
            let input = format!(
                "{}-{}-{}-{}",
                ip.unwrap_or("unknown"),
                ua.unwrap_or("unknown"),
                chrono::Utc::now().timestamp_millis(),
                random
            );
            let hash = fingerprint_hash(&input);
            let prefix: String = hash.chars().take(6).collect();
            format!("user_{}_{}_{}", prefix, random_id, random)
        }
    }
}

/// Chat inference payload
pub fn chat_payload(
    model: &str,
    messages: &[Value],
    temperature: f64,
    top_p: f64,
    user_id: &str,
) -> Value {
    json!({
        "characterId": "",
        "clientProcessingTime": 2,
        "conversationType": "text",
        "includeVeniceSystemPrompt": true,
        "isCharacter": false,
        "modelId": model,
        "prompt": messages,
        "reasoning": true,
        "requestId": short_id(),
        "systemPrompt": "",
        "temperature": temperature,
        "topP": top_p,
        "userId": user_id,
        "webEnabled": true,
    })
}

/// Image inference payload
pub fn image_payload(
    model: &str,
    prompt: &str,
    width: u32,
    height: u32,
    negative_prompt: &str,
    user_id: &str,
) -> Value {
    // The lighter diffusion models run fewer steps upstream.
    let steps = if model == "hidream" || model == "qwen-image" {
        20
    } else {
        25
    };

    json!({
        "aspectRatio": format!("{}:{}", width, height),
        "embedExifMetadata": true,
        "format": "webp",
        "height": height,
        "hideWatermark": false,
        "imageToImageCfgScale": 15,
        "imageToImageStrength": 33,
        "loraStrength": 75,
        "matureFilter": true,
        "messageId": short_id(),
        "modelId": model,
        "negativePrompt": negative_prompt,
        "parentMessageId": null,
        "prompt": prompt,
        "requestId": short_id(),
        "seed": rand::thread_rng().gen_range(0..2_u64.pow(31)),
        "steps": steps,
        "stylePreset": "None",
        "type": "image",
        "userId": user_id,
        "variants": 1,
        "width": width,
    })
}

/// Headers for a chat inference call
pub fn chat_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://venice.ai"));
    headers.insert(REFERER, HeaderValue::from_static("https://venice.ai/"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/event-stream, application/json, text/plain"),
    );
    headers
}

/// Headers for an image inference call
pub fn image_headers(version: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://venice.ai"));
    headers.insert(REFERER, HeaderValue::from_static("https://venice.ai/"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, image/*"));
    if let Ok(value) = HeaderValue::from_str(&chrono::Utc::now().to_rfc3339()) {
        headers.insert("x-venice-timestamp", value);
    }
    if let Ok(value) = HeaderValue::from_str(version) {
        headers.insert("x-venice-version", value);
    }
    headers
}

/// Parse an OpenAI-style "WxH" size string; defaults to 1024x1024
pub fn parse_size(size: Option<&str>) -> (u32, u32) {
    let raw = size.unwrap_or("1024x1024");
    let mut parts = raw.splitn(2, 'x');
    let width = parts.next().and_then(|p| p.trim().parse().ok());
    let height = parts.next().and_then(|p| p.trim().parse().ok());
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => (1024, 1024),
    }
}
