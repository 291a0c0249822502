//! OpenAI-compatible wire format
//!
//! Inbound request shapes and outbound response/chunk framing. The dispatch
//! core produces [`Fragment`]s; this module re-frames them into the event
//! stream OpenAI clients expect.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::outbound::Fragment;
use crate::upstream::short_id;

/// Marker text sent when an upstream stream is cut mid-response
const INTERRUPTED_NOTICE: &str = "\n\n[Stream interrupted due to error]";

/// Chat model IDs always present in the model listing
const CHAT_MODELS: &[&str] = &["dolphin-3.0-mistral-24b-1dot1", "mistral-31-24b"];

pub const DEFAULT_CHAT_MODEL: &str = "dolphin-3.0-mistral-24b-1dot1";

/// Inbound /v1/chat/completions request
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub stream: bool,
    /// Image generation size ("WxH"); only meaningful for image models
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
}

fn default_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

impl ChatCompletionRequest {
    /// Content of the last user message, used as the image prompt
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
    }
}

/// /v1/models listing: fixed chat models plus the configured image models
pub fn models_response(image_models: &[String]) -> Value {
    let mut data = Vec::new();
    for (idx, id) in CHAT_MODELS
        .iter()
        .map(|s| s.to_string())
        .chain(image_models.iter().cloned())
        .enumerate()
    {
        data.push(json!({
            "id": id,
            "object": "model",
            "created": 1_690_000_000 + idx as i64,
            "owned_by": "venice.ai",
        }));
    }

    json!({
        "object": "list",
        "data": data,
    })
}

/// One streaming chunk in OpenAI chat.completion.chunk shape
pub fn completion_chunk(model: &str, content: &str, finish_reason: Option<&str>) -> Value {
    json!({
        "id": format!("chatcmpl-{}", short_id()),
        "object": "chat.completion.chunk",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "delta": { "content": content },
            "index": 0,
            "finish_reason": finish_reason,
        }],
    })
}

/// A complete non-streaming chat.completion response
pub fn completion_response(model: &str, content: &str) -> Value {
    json!({
        "id": format!("chatcmpl-{}", short_id()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
    })
}

/// Re-frame one fragment as a server-sent event
pub fn sse_frame(model: &str, fragment: &Fragment) -> Bytes {
    match fragment {
        Fragment::Content(content) => {
            let chunk = completion_chunk(model, content, None);
            Bytes::from(format!("data: {}\n\n", chunk))
        }
        Fragment::Interrupted => {
            let chunk = completion_chunk(model, INTERRUPTED_NOTICE, Some("error"));
            Bytes::from(format!("data: {}\n\n", chunk))
        }
        Fragment::Done => Bytes::from_static(b"data: [DONE]\n\n"),
    }
}
