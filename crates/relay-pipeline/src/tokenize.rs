//! Token estimation over request payloads

use std::sync::OnceLock;

use serde_json::Value;
use tiktoken_rs::{CoreBPE, o200k_base};

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER.get_or_init(|| o200k_base().ok()).as_ref()
}

/// Count tokens in `text`, approximating when the encoder is unavailable
pub fn count_tokens(text: &str) -> u64 {
    let count = encoder().map_or_else(|| text.len().div_ceil(4), |bpe| bpe.encode_with_special_tokens(text).len());
    u64::try_from(count).unwrap_or(u64::MAX)
}

/// Estimate prompt tokens for a chat or completion payload
///
/// Counts `messages[].content` (string or text parts) and `prompt`
/// (string or array of strings).
pub fn estimate_prompt_tokens(payload: &Value) -> u64 {
    let mut total = 0_u64;

    if let Some(messages) = payload.get("messages").and_then(Value::as_array) {
        for message in messages {
            total = total.saturating_add(content_tokens(message.get("content")));
        }
    }

    total.saturating_add(content_tokens(payload.get("prompt")))
}

/// Completion budget requested by the payload, if any
pub fn requested_completion_tokens(payload: &Value) -> Option<u64> {
    payload
        .get("max_completion_tokens")
        .or_else(|| payload.get("max_tokens"))
        .and_then(Value::as_u64)
}

fn content_tokens(content: Option<&Value>) -> u64 {
    match content {
        Some(Value::String(text)) => count_tokens(text),
        Some(Value::Array(parts)) => parts
            .iter()
            .map(|part| match part {
                Value::String(text) => count_tokens(text),
                Value::Object(_) => part.get("text").and_then(Value::as_str).map_or(0, count_tokens),
                _ => 0,
            })
            .sum(),
        _ => 0,
    }
}
