//! Shared test utilities and fixtures
//!
//! A mock assistant API and a conversation wired to it.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fieldhand_engine::config::ApiSettings;
use fieldhand_engine::{
    AudioHandle, AudioStatus, Conversation, EngineSettings, HttpConnector, PlaybackError,
    SpeechSynthesizer,
};
use fieldhand_transport::StreamOptions;
use fieldhand_types::{BearerToken, PlaybackSessionId};
use serde_json::Value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const STREAM_PATH: &str = "/api/assistant/query/stream";
pub const LEGACY_PATH: &str = "/api/assistant/query";
pub const TOKEN: &str = "test-token";
pub const PROPERTY_ID: &str = "prop-7";

/// Encode envelopes as an SSE body, one `data:` record each.
pub fn sse_body(records: &[Value]) -> String {
    records
        .iter()
        .map(|record| format!("data: {record}\n\n"))
        .collect()
}

/// Mount a streaming response on the mock server.
pub async fn mount_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

/// Mount a non-streaming response on the mock server.
pub async fn mount_legacy(server: &MockServer, status: u16, body: Value) {
    Mock::given(method("POST"))
        .and(path(LEGACY_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

pub fn api_settings(server: &MockServer) -> ApiSettings {
    ApiSettings {
        stream_url: format!("{}{STREAM_PATH}", server.uri()),
        legacy_url: format!("{}{LEGACY_PATH}", server.uri()),
        token: BearerToken::new(TOKEN).unwrap(),
        property_id: PROPERTY_ID.to_string(),
    }
}

/// Records every utterance; audio ends as soon as it is polled.
#[derive(Debug, Clone, Default)]
pub struct RecordingSpeaker {
    pub spoken: Arc<Mutex<Vec<String>>>,
}

impl RecordingSpeaker {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

struct InstantAudio;

impl AudioHandle for InstantAudio {
    fn stop(&mut self) {}

    fn status(&mut self) -> AudioStatus {
        AudioStatus::Finished
    }
}

impl SpeechSynthesizer for RecordingSpeaker {
    fn start(
        &mut self,
        text: &str,
        _session: PlaybackSessionId,
    ) -> Result<Box<dyn AudioHandle>, PlaybackError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(Box::new(InstantAudio))
    }
}

/// A conversation talking to `server` with no playback delay.
pub fn conversation(server: &MockServer) -> (Conversation, RecordingSpeaker) {
    let speaker = RecordingSpeaker::default();
    let settings = EngineSettings {
        playback_delay: Duration::ZERO,
        ..EngineSettings::default()
    };
    let connector = HttpConnector::new(
        api_settings(server),
        StreamOptions {
            idle_timeout: Duration::from_secs(5),
        },
    );
    let conversation = Conversation::new(Box::new(connector), Box::new(speaker.clone()), settings);
    (conversation, speaker)
}

/// Tick until the stream has been finalized.
pub async fn run_until_idle(conversation: &mut Conversation) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while conversation.is_streaming() {
        assert!(Instant::now() < deadline, "stream did not finish");
        conversation.tick(Instant::now());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // One more tick fires playback scheduled with zero delay.
    conversation.tick(Instant::now());
}
