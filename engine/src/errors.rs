//! Error types surfaced by the engine and user-facing error formatting.

use std::fmt::Write;

use serde_json::Value;
use thiserror::Error;

use fieldhand_transport::TransportError;

use crate::config::config_path;
use crate::security::redact_bearer_tokens;

const MAX_DETAIL_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("a response is still streaming; stop it or wait for it to finish")]
    StreamInFlight,
    #[error("prompt is empty")]
    EmptyPrompt,
}

/// Pull a human message out of a JSON error body, if it is one.
#[must_use]
pub fn extract_error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body.trim()).ok()?;
    payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/message").and_then(Value::as_str))
        .or_else(|| payload.pointer("/error").and_then(Value::as_str))
        .or_else(|| payload.as_str())
        .filter(|text| !text.trim().is_empty())
        .map(ToString::to_string)
}

#[must_use]
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    const ELLIPSIS: &str = "...";
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    // Too narrow for the ellipsis: hard cut.
    if max_chars < ELLIPSIS.len() {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - ELLIPSIS.len()).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Turn a transport failure into the text shown in the message bubble.
///
/// The caller prefixes it with `Error: `.
#[must_use]
pub fn format_stream_error(err: &TransportError) -> String {
    let text = match err {
        TransportError::Status { status, body } if matches!(status, 401 | 403) => {
            let mut content = format!("Authentication failed ({status}).");
            let config_hint = config_path().map_or_else(
                || "~/.fieldhand/config.toml".to_string(),
                |p| p.display().to_string(),
            );
            let _ = write!(
                content,
                " Set FIELDHAND_TOKEN or add `token` under [api] in {config_hint}, then resend."
            );
            let detail = detail_from_body(body);
            if !detail.is_empty() {
                content.push_str("\n\nDetails: ");
                content.push_str(&detail);
            }
            content
        }
        TransportError::Status { status, body } => {
            let detail = detail_from_body(body);
            if detail.is_empty() {
                format!("Request failed ({status}).")
            } else {
                format!("Request failed ({status}): {detail}")
            }
        }
        TransportError::Request(e) => format!("Could not reach the assistant: {e}"),
        TransportError::Stream(e) => format!("Connection lost mid-response: {e}"),
        TransportError::IdleTimeout { secs } => {
            format!("The assistant stopped responding (no data for {secs}s).")
        }
        TransportError::BufferOverflow { .. } | TransportError::InvalidResponse(_) => {
            format!("The assistant sent an unreadable response: {err}")
        }
    };
    redact_bearer_tokens(&text)
}

fn detail_from_body(body: &str) -> String {
    let detail = extract_error_message(body).unwrap_or_else(|| body.trim().to_string());
    truncate_with_ellipsis(detail.trim(), MAX_DETAIL_CHARS)
}
