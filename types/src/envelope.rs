//! Streaming envelopes: one decoded unit of the assistant's event stream.
//!
//! The wire shape is `{ "type": string, "data": object, "timestamp": string }`.
//! The `type` string is an open set, so decoding never rejects an envelope for
//! its type: recognized types get a typed [`EventPayload`] variant and
//! everything else lands in [`EventPayload::Unknown`].
//!
//! Payload decoding is lenient. A recognized type whose `data` does not fit
//! the expected shape degrades to `Unknown` (logged at `warn`) rather than
//! failing the whole record.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::visualization::{RawVisualization, lenient_raw};

/// Pipeline stages that only carry status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusStage {
    Init,
    Auth,
    Connection,
    Progress,
    Step,
    Analysis,
    QueryGeneration,
    QueryExecution,
    Interpretation,
    DataPreparation,
    DataSending,
}

impl StatusStage {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "init" => Some(StatusStage::Init),
            "auth" => Some(StatusStage::Auth),
            "connection" => Some(StatusStage::Connection),
            "progress" => Some(StatusStage::Progress),
            "step" => Some(StatusStage::Step),
            "analysis" => Some(StatusStage::Analysis),
            "query-generation" => Some(StatusStage::QueryGeneration),
            "query-execution" => Some(StatusStage::QueryExecution),
            "interpretation" => Some(StatusStage::Interpretation),
            "data-preparation" => Some(StatusStage::DataPreparation),
            "data-sending" => Some(StatusStage::DataSending),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StatusStage::Init => "init",
            StatusStage::Auth => "auth",
            StatusStage::Connection => "connection",
            StatusStage::Progress => "progress",
            StatusStage::Step => "step",
            StatusStage::Analysis => "analysis",
            StatusStage::QueryGeneration => "query-generation",
            StatusStage::QueryExecution => "query-execution",
            StatusStage::Interpretation => "interpretation",
            StatusStage::DataPreparation => "data-preparation",
            StatusStage::DataSending => "data-sending",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `metadata` envelope: interpretation text, an optional visualization, and
/// pipeline/audit fields that are logged but never rendered.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MetadataPayload {
    #[serde(default)]
    pub interpretation: Option<String>,
    #[serde(default, deserialize_with = "lenient_raw")]
    pub visualization: Option<RawVisualization>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub audit: serde_json::Map<String, Value>,
}

/// `data` / `result` / `results` envelope carrying a whole result set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsMeta {
    #[serde(default)]
    pub total_items: Option<usize>,
    #[serde(default)]
    pub total_chunks: Option<usize>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsChunk {
    #[serde(default)]
    pub chunk_index: Option<usize>,
    #[serde(default)]
    pub total_chunks: Option<usize>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub total_items: Option<usize>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, alias = "result")]
    pub data: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsComplete {
    #[serde(default)]
    pub total_items: Option<usize>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Content a terminal signal may carry.
///
/// Used for the `complete` envelope, for the trailing payload object a
/// stream may end with, and for the legacy non-streaming response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_raw",
        skip_serializing_if = "Option::is_none"
    )]
    pub visualization: Option<RawVisualization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl FinalPayload {
    /// True when the payload carries nothing that could override a message.
    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.interpretation.is_none()
            && self.visualization.is_none()
            && self.result.as_ref().is_none_or(Value::is_null)
            && self.data.as_ref().is_none_or(Value::is_null)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorPayload {
    #[must_use]
    pub fn text(&self) -> &str {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .filter(|text| !text.trim().is_empty())
            .unwrap_or("Unknown error")
    }
}

/// Typed payload, one variant per recognized envelope type.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Status {
        stage: StatusStage,
        update: StatusUpdate,
    },
    Metadata(MetadataPayload),
    Visualization(RawVisualization),
    Result(ResultPayload),
    ResultsMeta(ResultsMeta),
    ResultsChunk(ResultsChunk),
    ResultsComplete(ResultsComplete),
    Complete(FinalPayload),
    Error(ErrorPayload),
    Heartbeat,
    /// Unrecognized type, or a recognized type whose data did not decode.
    Unknown {
        interpretation: Option<String>,
        status_text: Option<String>,
    },
}

impl EventPayload {
    fn parse(kind: &str, data: &Value) -> Self {
        if let Some(stage) = StatusStage::parse(kind) {
            return decode(kind, data).map_or_else(
                || unknown(data),
                |update| EventPayload::Status { stage, update },
            );
        }

        let decoded = match kind {
            "metadata" => decode(kind, data).map(EventPayload::Metadata),
            "visualization" => {
                let inner = data.get("visualization").unwrap_or(data);
                decode(kind, inner).map(EventPayload::Visualization)
            }
            "data" | "result" | "results" => decode(kind, data).map(EventPayload::Result),
            "results_meta" => decode(kind, data).map(EventPayload::ResultsMeta),
            "results_chunk" => decode(kind, data).map(EventPayload::ResultsChunk),
            "results_complete" => decode(kind, data).map(EventPayload::ResultsComplete),
            // Terminal signals stay terminal even when their data is malformed.
            "complete" => Some(EventPayload::Complete(
                decode(kind, data).unwrap_or_default(),
            )),
            "error" => Some(EventPayload::Error(decode(kind, data).unwrap_or_else(
                || ErrorPayload {
                    error: None,
                    message: status_text(data),
                },
            ))),
            "heartbeat" => Some(EventPayload::Heartbeat),
            _ => None,
        };
        decoded.unwrap_or_else(|| unknown(data))
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventPayload::Complete(_) | EventPayload::Error(_))
    }
}

fn decode<T: DeserializeOwned>(kind: &str, data: &Value) -> Option<T> {
    let source = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data.clone()
    };
    match serde_json::from_value(source) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!(%e, event_type = kind, "Envelope data did not match its type");
            None
        }
    }
}

fn unknown(data: &Value) -> EventPayload {
    EventPayload::Unknown {
        interpretation: first_text(data, &["interpretation"]),
        status_text: first_text(data, &["message", "status"]),
    }
}

/// Best-effort human text from an arbitrary data object.
#[must_use]
pub fn status_text(data: &Value) -> Option<String> {
    first_text(data, &["message", "status", "interpretation"])
}

fn first_text(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .filter(|text| !text.trim().is_empty())
        .map(ToString::to_string)
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope is not a JSON object")]
    NotAnObject,
    #[error("envelope has no string `type` field")]
    MissingType,
}

/// One decoded envelope. Immutable once constructed.
///
/// Clones share one allocation, so the transport log and a message's event
/// history hold the same rows rather than copies of them.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingEvent {
    inner: Arc<EventInner>,
}

#[derive(Debug, Clone, PartialEq)]
struct EventInner {
    kind: String,
    payload: EventPayload,
    data: Value,
    timestamp: Option<String>,
}

impl StreamingEvent {
    /// Decode an envelope from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut object) = value else {
            return Err(EnvelopeError::NotAnObject);
        };
        let kind = match object.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(EnvelopeError::MissingType),
        };
        let data = object.remove("data").unwrap_or(Value::Null);
        let timestamp = object
            .remove("timestamp")
            .and_then(|ts| ts.as_str().map(ToString::to_string));
        Ok(Self::new(kind, data, timestamp))
    }

    pub fn new(kind: impl Into<String>, data: Value, timestamp: Option<String>) -> Self {
        let kind = kind.into();
        let payload = EventPayload::parse(&kind, &data);
        Self {
            inner: Arc::new(EventInner {
                kind,
                payload,
                data,
                timestamp,
            }),
        }
    }

    /// Stamp an envelope that arrived without a timestamp. The payload is
    /// not decoded again.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner).timestamp = Some(timestamp.into());
        self
    }

    /// A `complete` envelope synthesized from a terminal payload.
    #[must_use]
    pub fn complete(payload: &FinalPayload, timestamp: Option<String>) -> Self {
        let data = serde_json::to_value(payload).unwrap_or(Value::Null);
        Self::new("complete", data, timestamp)
    }

    /// An `error` envelope synthesized from a failure description.
    #[must_use]
    pub fn error(message: impl Into<String>, timestamp: Option<String>) -> Self {
        let data = serde_json::json!({ "error": message.into() });
        Self::new("error", data, timestamp)
    }

    /// The raw `type` string as received.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.inner.payload
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.inner.data
    }

    #[must_use]
    pub fn timestamp(&self) -> Option<&str> {
        self.inner.timestamp.as_deref()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.inner.payload.is_terminal()
    }
}
