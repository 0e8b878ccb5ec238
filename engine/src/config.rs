use serde::Deserialize;
use std::time::Duration;
use std::{env, fs, path::Path, path::PathBuf};

use fieldhand_transport::StreamOptions;
use fieldhand_types::BearerToken;

use crate::EngineSettings;

pub const DEFAULT_STREAM_PATH: &str = "/api/assistant/query/stream";
pub const DEFAULT_LEGACY_PATH: &str = "/api/assistant/query";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PLAYBACK_DELAY_MS: u64 = 500;
pub const DEFAULT_DEBOUNCE_MS: u64 = 800;

const TOKEN_ENV: &str = "FIELDHAND_TOKEN";
const IDLE_TIMEOUT_ENV: &str = "FIELDHAND_STREAM_IDLE_TIMEOUT_SECS";

const fn default_true() -> bool {
    true
}

/// Contents of `~/.fieldhand/config.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FieldhandConfig {
    pub api: Option<ApiConfig>,
    pub stream: Option<StreamConfig>,
    pub voice: Option<VoiceConfig>,
    pub dictation: Option<DictationConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("missing setting `{0}`")]
    Missing(&'static str),
    #[error("no API token configured (set FIELDHAND_TOKEN or [api].token)")]
    MissingToken,
}

/// ```toml
/// [api]
/// base_url = "https://farm.example.com"
/// token = "${FIELDHAND_TOKEN}"
/// property_id = "prop-1"
/// ```
#[derive(Default, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub stream_path: Option<String>,
    pub legacy_path: Option<String>,
    pub token: Option<String>,
    pub property_id: Option<String>,
}

// Manual Debug impl to keep the token out of logs.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("stream_path", &self.stream_path)
            .field("legacy_path", &self.legacy_path)
            .field(
                "token",
                &if self.token.is_some() { "[REDACTED]" } else { "None" },
            )
            .field("property_id", &self.property_id)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamConfig {
    /// Seconds without any bytes before the stream is abandoned. Default: 60.
    pub idle_timeout_secs: Option<u64>,
    /// Envelopes applied per loop iteration. Default: 256.
    pub event_budget: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct VoiceConfig {
    /// Speak finished answers. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delay between finalization and playback. Default: 500.
    pub playback_delay_ms: Option<u64>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            playback_delay_ms: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DictationConfig {
    /// Quiet period after dictation stops before the transcript is sent. Default: 800.
    pub debounce_ms: Option<u64>,
}

/// Resolved endpoint and credential.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub stream_url: String,
    pub legacy_url: String,
    pub token: BearerToken,
    pub property_id: String,
}

/// Expand `${VAR}` references from the process environment.
///
/// Unset variables expand to the empty string. An unclosed `${` is kept.
pub fn expand_env_vars(value: &str) -> String {
    expand_env_vars_with(value, |name| env::var(name).ok())
}

pub fn expand_env_vars_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[start + 2..start + 2 + len];
        if !name.is_empty() {
            out.push_str(&lookup(name).unwrap_or_default());
        }
        rest = &rest[start + 2 + len + 1..];
    }
    out.push_str(rest);
    out
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl FieldhandConfig {
    /// Load the config file. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    pub fn api_settings(&self) -> Result<ApiSettings, ConfigError> {
        self.api_settings_with(|name| env::var(name).ok())
    }

    /// Resolve the API section, reading the environment through `lookup`.
    ///
    /// `FIELDHAND_TOKEN` wins over `[api].token`.
    pub fn api_settings_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ApiSettings, ConfigError> {
        let api = self.api.as_ref();
        let expand = |value: &Option<String>| {
            value
                .as_deref()
                .map(|v| expand_env_vars_with(v, &lookup))
                .filter(|v| !v.trim().is_empty())
        };

        let base_url = api
            .and_then(|a| expand(&a.base_url))
            .ok_or(ConfigError::Missing("api.base_url"))?;
        let property_id = api
            .and_then(|a| expand(&a.property_id))
            .ok_or(ConfigError::Missing("api.property_id"))?;
        let stream_path = api
            .and_then(|a| expand(&a.stream_path))
            .unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string());
        let legacy_path = api
            .and_then(|a| expand(&a.legacy_path))
            .unwrap_or_else(|| DEFAULT_LEGACY_PATH.to_string());

        let token = lookup(TOKEN_ENV)
            .filter(|t| !t.trim().is_empty())
            .or_else(|| api.and_then(|a| expand(&a.token)))
            .ok_or(ConfigError::MissingToken)?;
        let token = BearerToken::new(token).map_err(|_| ConfigError::MissingToken)?;

        Ok(ApiSettings {
            stream_url: join_url(&base_url, &stream_path),
            legacy_url: join_url(&base_url, &legacy_path),
            token,
            property_id,
        })
    }

    #[must_use]
    pub fn stream_options(&self) -> StreamOptions {
        self.stream_options_with(|name| env::var(name).ok())
    }

    pub fn stream_options_with(&self, lookup: impl Fn(&str) -> Option<String>) -> StreamOptions {
        let secs = lookup(IDLE_TIMEOUT_ENV)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .or_else(|| self.stream.as_ref().and_then(|s| s.idle_timeout_secs))
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
        StreamOptions {
            idle_timeout: Duration::from_secs(secs),
        }
    }

    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        let voice = self.voice.as_ref();
        EngineSettings {
            voice_enabled: voice.is_none_or(|v| v.enabled),
            playback_delay: voice
                .and_then(|v| v.playback_delay_ms)
                .map_or(defaults.playback_delay, Duration::from_millis),
            dictation_debounce: self
                .dictation
                .as_ref()
                .and_then(|d| d.debounce_ms)
                .map_or(defaults.dictation_debounce, Duration::from_millis),
            event_budget: self
                .stream
                .as_ref()
                .and_then(|s| s.event_budget)
                .filter(|budget| *budget > 0)
                .unwrap_or(defaults.event_budget),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".fieldhand").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn parse(toml: &str) -> FieldhandConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn expand_env_vars_replaces_known_and_blanks_unknown() {
        let env = env_of(&[("FARM", "north")]);
        assert_eq!(expand_env_vars_with("field-${FARM}-${NOPE}", &env), "field-north-");
        assert_eq!(expand_env_vars_with("no vars", &env), "no vars");
    }

    #[test]
    fn expand_env_vars_keeps_unclosed_and_empty_names() {
        let env = env_of(&[]);
        assert_eq!(expand_env_vars_with("${UNCLOSED", &env), "${UNCLOSED");
        assert_eq!(expand_env_vars_with("a${}b", &env), "ab");
    }

    #[test]
    fn expand_env_vars_handles_adjacent_and_unicode() {
        let env = env_of(&[("A", "é"), ("B", "ü")]);
        assert_eq!(expand_env_vars_with("→${A}${B}←", &env), "→éü←");
    }

    #[test]
    fn empty_config_parses() {
        let config = parse("");
        assert!(config.api.is_none());
        assert!(config.voice.is_none());
    }

    #[test]
    fn api_settings_resolve_urls_and_token() {
        let config = parse(
            r#"
            [api]
            base_url = "https://farm.example.com/"
            token = "${MY_TOKEN}"
            property_id = "prop-1"
            "#,
        );
        let settings = config
            .api_settings_with(env_of(&[("MY_TOKEN", "abc")]))
            .unwrap();
        assert_eq!(
            settings.stream_url,
            "https://farm.example.com/api/assistant/query/stream"
        );
        assert_eq!(settings.legacy_url, "https://farm.example.com/api/assistant/query");
        assert_eq!(settings.token.expose_secret(), "abc");
        assert_eq!(settings.property_id, "prop-1");
    }

    #[test]
    fn token_env_overrides_file() {
        let config = parse(
            r#"
            [api]
            base_url = "http://localhost:8080"
            token = "from-file"
            property_id = "p"
            "#,
        );
        let settings = config
            .api_settings_with(env_of(&[("FIELDHAND_TOKEN", "from-env")]))
            .unwrap();
        assert_eq!(settings.token.expose_secret(), "from-env");
    }

    #[test]
    fn missing_token_is_an_error() {
        let config = parse(
            r#"
            [api]
            base_url = "http://localhost"
            token = "${UNSET}"
            property_id = "p"
            "#,
        );
        assert!(matches!(
            config.api_settings_with(env_of(&[])),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn missing_base_url_is_named() {
        let err = parse("[api]\nproperty_id = \"p\"")
            .api_settings_with(env_of(&[]))
            .unwrap_err();
        assert_eq!(err.to_string(), "missing setting `api.base_url`");
    }

    #[test]
    fn api_debug_redacts_token() {
        let config = parse("[api]\ntoken = \"super-secret\"");
        let debug = format!("{:?}", config.api.unwrap());
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn idle_timeout_env_overrides_file() {
        let config = parse("[stream]\nidle_timeout_secs = 30");
        assert_eq!(
            config.stream_options_with(env_of(&[])).idle_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(
            config
                .stream_options_with(env_of(&[("FIELDHAND_STREAM_IDLE_TIMEOUT_SECS", "5")]))
                .idle_timeout,
            Duration::from_secs(5)
        );
        assert_eq!(
            parse("").stream_options_with(env_of(&[])).idle_timeout,
            Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)
        );
    }

    #[test]
    fn engine_settings_defaults_and_overrides() {
        let defaults = parse("").engine_settings();
        assert!(defaults.voice_enabled);
        assert_eq!(defaults.playback_delay, Duration::from_millis(DEFAULT_PLAYBACK_DELAY_MS));

        let settings = parse(
            r#"
            [voice]
            enabled = false
            playback_delay_ms = 100

            [dictation]
            debounce_ms = 250

            [stream]
            event_budget = 16
            "#,
        )
        .engine_settings();
        assert!(!settings.voice_enabled);
        assert_eq!(settings.playback_delay, Duration::from_millis(100));
        assert_eq!(settings.dictation_debounce, Duration::from_millis(250));
        assert_eq!(settings.event_budget, 16);
    }

    #[test]
    fn voice_section_without_enabled_defaults_on() {
        assert!(parse("[voice]\nplayback_delay_ms = 1").engine_settings().voice_enabled);
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[api\nbase_url = 1").unwrap();
        let err = FieldhandConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[dictation]\ndebounce_ms = 42\n").unwrap();
        let config = FieldhandConfig::load_from(&path).unwrap();
        assert_eq!(config.dictation.unwrap().debounce_ms, Some(42));
    }
}
