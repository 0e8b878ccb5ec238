//! Chart/table visualizations attached to assistant messages.
//!
//! The server names the visualization kind as a free string. Only five kinds
//! can be rendered; [`Visualization::try_from`] is the gate that turns a wire
//! [`RawVisualization`] into a renderable one.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Renderable visualization kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    Bar,
    Line,
    Pie,
    Doughnut,
    Table,
}

impl VisualizationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VisualizationKind::Bar => "bar",
            VisualizationKind::Line => "line",
            VisualizationKind::Pie => "pie",
            VisualizationKind::Doughnut => "doughnut",
            VisualizationKind::Table => "table",
        }
    }

    /// Parse a wire name. Matching is exact apart from ASCII case.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bar" => Some(VisualizationKind::Bar),
            "line" => Some(VisualizationKind::Line),
            "pie" => Some(VisualizationKind::Pie),
            "doughnut" => Some(VisualizationKind::Doughnut),
            "table" => Some(VisualizationKind::Table),
            _ => None,
        }
    }

    #[must_use]
    pub fn all() -> &'static [VisualizationKind] {
        &[
            VisualizationKind::Bar,
            VisualizationKind::Line,
            VisualizationKind::Pie,
            VisualizationKind::Doughnut,
            VisualizationKind::Table,
        ]
    }
}

impl std::fmt::Display for VisualizationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chart data handed to the rendering widget untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default)]
    pub labels: Vec<Value>,
    #[serde(default)]
    pub datasets: Vec<Value>,
    #[serde(default, alias = "options", skip_serializing_if = "Value::is_null")]
    pub render_options: Value,
}

/// Visualization exactly as the server sent it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVisualization {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Field deserializer for an optional visualization nested in a larger
/// payload. A visualization that does not fit [`RawVisualization`] is
/// logged and dropped so the surrounding fields still decode.
pub(crate) fn lenient_raw<'de, D>(deserializer: D) -> Result<Option<RawVisualization>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) => {
            tracing::warn!(%e, "Dropping malformed visualization");
            Ok(None)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VisualizationError {
    #[error("unsupported visualization type {0:?}")]
    UnsupportedKind(String),
    #[error("malformed visualization config: {0}")]
    MalformedConfig(String),
}

/// A visualization that passed the kind gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visualization {
    #[serde(rename = "type")]
    pub kind: VisualizationKind,
    pub config: ChartConfig,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl TryFrom<RawVisualization> for Visualization {
    type Error = VisualizationError;

    fn try_from(raw: RawVisualization) -> Result<Self, Self::Error> {
        let kind = VisualizationKind::parse(&raw.kind)
            .ok_or_else(|| VisualizationError::UnsupportedKind(raw.kind.clone()))?;
        let config = match raw.config {
            None | Some(Value::Null) => ChartConfig::default(),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| VisualizationError::MalformedConfig(e.to_string()))?,
        };
        Ok(Self {
            kind,
            config,
            title: raw.title,
            description: raw.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{RawVisualization, Visualization, VisualizationError, VisualizationKind};
    use serde_json::json;

    fn raw(kind: &str) -> RawVisualization {
        serde_json::from_value(json!({
            "type": kind,
            "config": {
                "labels": ["north", "south"],
                "datasets": [{"label": "yield", "data": [4.2, 3.9]}],
                "options": {"responsive": true}
            },
            "title": "Yield by field"
        }))
        .unwrap()
    }

    #[test]
    fn accepts_each_supported_kind() {
        for kind in VisualizationKind::all() {
            let viz = Visualization::try_from(raw(kind.as_str())).unwrap();
            assert_eq!(viz.kind, *kind);
            assert_eq!(viz.config.labels.len(), 2);
            assert_eq!(viz.config.render_options, json!({"responsive": true}));
        }
    }

    #[test]
    fn kind_match_ignores_case() {
        assert_eq!(VisualizationKind::parse("Bar"), Some(VisualizationKind::Bar));
    }

    #[test]
    fn rejects_scatter() {
        let err = Visualization::try_from(raw("scatter")).unwrap_err();
        assert_eq!(err, VisualizationError::UnsupportedKind("scatter".to_string()));
    }

    #[test]
    fn rejects_missing_kind() {
        let raw: RawVisualization = serde_json::from_value(json!({"title": "x"})).unwrap();
        assert!(matches!(
            Visualization::try_from(raw),
            Err(VisualizationError::UnsupportedKind(_))
        ));
    }

    #[test]
    fn missing_config_defaults_to_empty_chart() {
        let raw: RawVisualization = serde_json::from_value(json!({"type": "table"})).unwrap();
        let viz = Visualization::try_from(raw).unwrap();
        assert!(viz.config.datasets.is_empty());
    }

    #[test]
    fn malformed_config_is_rejected() {
        let raw: RawVisualization =
            serde_json::from_value(json!({"type": "pie", "config": {"labels": 3}})).unwrap();
        assert!(matches!(
            Visualization::try_from(raw),
            Err(VisualizationError::MalformedConfig(_))
        ));
    }
}
