//! Tabular query results attached to assistant messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query result rows plus whatever raw payload the server sent alongside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBundle {
    pub result: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ResultBundle {
    /// Build a bundle from a single result-bearing payload.
    ///
    /// `result` wins when it is an array. Otherwise an array `raw` is used as
    /// the rows, and a lone object becomes a single row.
    #[must_use]
    pub fn from_payload(result: Option<&Value>, raw: Option<&Value>) -> Option<Self> {
        let rows = match (result, raw) {
            (Some(Value::Array(rows)), _) => rows.clone(),
            (Some(Value::Null) | None, Some(Value::Array(rows))) => rows.clone(),
            (Some(Value::Null) | None, None | Some(Value::Null)) => return None,
            (Some(Value::Null) | None, Some(other)) => vec![other.clone()],
            (Some(other), _) => vec![other.clone()],
        };
        Some(Self {
            result: rows,
            raw_data: raw.filter(|value| !value.is_null()).cloned(),
            summary: None,
        })
    }

    #[must_use]
    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        self.summary = summary;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.result.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }
}

/// Bookkeeping for a result set that arrives in chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkProgress {
    /// Row count announced by `results_meta`, if any.
    pub total_items: Option<usize>,
    /// Chunk count announced by `results_meta` or the chunks themselves.
    pub total_chunks: Option<usize>,
    pub received_chunks: usize,
    pub received_items: usize,
    /// Last progress percentage reported by the server.
    pub progress: Option<f64>,
    pub finished: bool,
}

impl ChunkProgress {
    #[must_use]
    pub fn announced(total_items: Option<usize>, total_chunks: Option<usize>) -> Self {
        Self {
            total_items,
            total_chunks,
            ..Self::default()
        }
    }

    /// True when the received row count disagrees with the announced total.
    #[must_use]
    pub fn item_mismatch(&self) -> Option<(usize, usize)> {
        match self.total_items {
            Some(expected) if expected != self.received_items => {
                Some((expected, self.received_items))
            }
            _ => None,
        }
    }
}
