//! HTTP error mapping utilities

use crate::error::ChatError;
use reqwest::StatusCode;
use serde_json::Value;
use uuid::Uuid;

/// Characters of raw body kept when no structured message is found
const RAW_BODY_PREVIEW_CHARS: usize = 100;

/// Map a non-success status and its body to a ChatError
pub fn map_http_error(status: StatusCode, body: Option<String>, request_id: Uuid) -> ChatError {
    let message = extract_error_message(body.as_deref().unwrap_or(""))
        .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));

    tracing::debug!(
        "Mapped HTTP {} to transport error: {} [request_id: {}]",
        status.as_u16(),
        message,
        request_id
    );

    ChatError::Transport {
        status: status.as_u16(),
        message,
    }
}

/// Best-effort message from an error body
///
/// Prefers a structured `detail`, then `error`, then `message` field, and
/// falls back to the first 100 characters of the raw body.
pub fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = extract_structured(&json) {
            return Some(message);
        }
    }

    Some(trimmed.chars().take(RAW_BODY_PREVIEW_CHARS).collect())
}

fn extract_structured(json: &Value) -> Option<String> {
    // FastAPI format: { "detail": "..." } or { "detail": [{ "loc": [...], "msg": "..." }] }
    if let Some(detail) = json.get("detail") {
        return render_detail(detail);
    }

    // { "error": "..." } or OpenAI-style { "error": { "message": "..." } }
    if let Some(error) = json.get("error") {
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
        if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
            return Some(message.to_string());
        }
    }

    json.get("message")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn render_detail(detail: &Value) -> Option<String> {
    match detail {
        Value::String(message) => Some(message.clone()),
        Value::Array(entries) => {
            let messages: Vec<&str> = entries
                .iter()
                .filter_map(|entry| entry.get("msg").and_then(|m| m.as_str()))
                .collect();
            if messages.is_empty() {
                Some(detail.to_string())
            } else {
                Some(messages.join("; "))
            }
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
