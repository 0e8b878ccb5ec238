//! Streaming transport client for the Fieldhand assistant API.
//!
//! # Architecture
//!
//! - [`open`] - POST a prompt to the streaming endpoint and decode the reply
//!   into envelopes on a background task
//! - [`open_legacy`] - same contract over the non-streaming endpoint, which
//!   yields exactly one synthetic envelope
//! - [`StreamHandle`] - append-only envelope log, transport state, and `stop()`
//!
//! The server speaks server-sent events. Each record's `data:` lines carry one
//! JSON object: an envelope `{type, data, timestamp}`, or, at most once and at
//! the end, a bare payload object `{interpretation?, visualization?, result?}`
//! that is kept as the stream's final payload.
//!
//! # Error Handling
//!
//! Records that fail to decode are dropped with a warning and do not end the
//! stream. Connection failures, non-success statuses, idle timeouts and buffer
//! overflow end the stream in [`TransportState::Failed`]. Nothing is retried.

mod framing;
mod handle;
pub mod legacy;

pub use handle::{StreamFeed, StreamHandle, TransportState, channel};

pub use fieldhand_types;

use std::sync::OnceLock;
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable};
pub use reqwest::header::HeaderMap;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use serde::Serialize;

use fieldhand_types::BearerToken;

use framing::{SseDecoder, SseRecord};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("stream idle for {secs}s")]
    IdleTimeout { secs: u64 },
    #[error("stream buffer exceeded {limit_bytes} bytes without a record boundary")]
    BufferOverflow { limit_bytes: usize },
    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// HTTP status for status errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!("Failed to build tuned HTTP client: {e}. Using defaults.");
            reqwest::Client::new()
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
}

/// Request body for both endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub prompt: String,
    pub property_id: String,
}

/// Everything needed to address one request.
#[derive(Debug, Clone)]
pub struct StreamRequest<'a> {
    pub url: &'a str,
    pub body: &'a QueryRequest,
    pub token: &'a BearerToken,
    /// Added after the protocol headers; may not override them.
    pub extra_headers: HeaderMap,
}

impl<'a> StreamRequest<'a> {
    #[must_use]
    pub fn new(url: &'a str, body: &'a QueryRequest, token: &'a BearerToken) -> Self {
        Self {
            url,
            body,
            token,
            extra_headers: HeaderMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub idle_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }
}

fn build_request(
    client: &reqwest::Client,
    request: &StreamRequest<'_>,
    accept: &'static str,
) -> reqwest::RequestBuilder {
    let mut headers = request.extra_headers.clone();
    headers.insert(ACCEPT, HeaderValue::from_static(accept));
    match HeaderValue::from_str(&request.token.header_value()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Err(e) => tracing::warn!(%e, "Bearer token is not a valid header value"),
    }
    client.post(request.url).headers(headers).json(request.body)
}

/// Open a streaming request.
///
/// Returns immediately; envelopes are appended to the handle's log as they
/// are decoded. Must be called from within a Tokio runtime.
pub fn open(
    client: &reqwest::Client,
    request: StreamRequest<'_>,
    options: StreamOptions,
) -> StreamHandle {
    let builder = build_request(client, &request, "text/event-stream");
    let (feed, handle) = channel();
    let (abort_handle, abort_registration) = AbortHandle::new_pair();

    tracing::info!(url = request.url, "Opening assistant stream");
    let task = run_stream(builder, feed, options);
    tokio::spawn(async move {
        let _ = Abortable::new(task, abort_registration).await;
    });

    handle.with_abort_handle(abort_handle)
}

/// Open a request against the non-streaming endpoint.
///
/// The response is delivered as a single synthetic `complete` (or `error`)
/// envelope followed by a normal close, so callers consume both endpoints the
/// same way.
pub fn open_legacy(client: &reqwest::Client, request: StreamRequest<'_>) -> StreamHandle {
    let builder = build_request(client, &request, "application/json");
    let (feed, handle) = channel();
    let (abort_handle, abort_registration) = AbortHandle::new_pair();

    tracing::info!(url = request.url, "Sending legacy assistant request");
    let task = async move {
        match legacy::send(builder).await {
            Ok(response) => {
                feed.push(response.into_envelope(Some(now_timestamp())));
                feed.finish();
            }
            Err(e) => {
                tracing::warn!(%e, "Legacy request failed");
                feed.fail(e);
            }
        }
    };
    tokio::spawn(async move {
        let _ = Abortable::new(task, abort_registration).await;
    });

    handle.with_abort_handle(abort_handle)
}

async fn run_stream(builder: reqwest::RequestBuilder, feed: StreamFeed, options: StreamOptions) {
    let response = match tokio::time::timeout(options.idle_timeout, builder.send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::warn!(%e, "Stream request failed");
            feed.fail(TransportError::Request(e.to_string()));
            return;
        }
        Err(_) => {
            tracing::warn!("No response before idle timeout");
            feed.fail(TransportError::IdleTimeout {
                secs: options.idle_timeout.as_secs(),
            });
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = read_capped_error_body(response).await;
        tracing::warn!(status = status.as_u16(), "Stream request rejected");
        feed.fail(TransportError::Status {
            status: status.as_u16(),
            body,
        });
        return;
    }

    match process_sse_stream(response, &feed, options.idle_timeout).await {
        Ok(()) => feed.finish(),
        Err(e) => {
            tracing::warn!(%e, "Stream ended abnormally");
            feed.fail(e);
        }
    }
}

/// Decode an SSE response body into the feed until the server closes it.
///
/// Returns early (Ok) when the reader stops the stream.
async fn process_sse_stream(
    response: reqwest::Response,
    feed: &StreamFeed,
    idle_timeout: Duration,
) -> Result<(), TransportError> {
    use futures_util::StreamExt;

    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new(MAX_SSE_BUFFER_BYTES);

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            return Err(TransportError::IdleTimeout {
                secs: idle_timeout.as_secs(),
            });
        };

        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| TransportError::Stream(e.to_string()))?;
        decoder.extend(&chunk)?;

        while let Some(record) = decoder.next_record() {
            if !deliver(record, feed) {
                return Ok(());
            }
        }
    }

    // A final record may arrive without its trailing blank line.
    if let Some(record) = decoder.finish() {
        deliver(record, feed);
    }
    Ok(())
}

/// Route one decoded record. Returns `false` when the stream should end.
fn deliver(record: SseRecord, feed: &StreamFeed) -> bool {
    match record {
        SseRecord::Envelope(event) => {
            let event = if event.timestamp().is_some() {
                event
            } else {
                event.with_timestamp(now_timestamp())
            };
            tracing::trace!(event_type = event.kind(), "Envelope received");
            feed.push(event)
        }
        SseRecord::FinalPayload(payload) => feed.set_final_payload(payload),
        SseRecord::Done => false,
        SseRecord::Skip => feed.is_open(),
        SseRecord::Malformed(reason) => {
            tracing::warn!(reason = %reason, "Dropping undecodable stream record");
            feed.record_dropped();
            feed.is_open()
        }
    }
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
