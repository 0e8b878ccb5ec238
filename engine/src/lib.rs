//! Core engine for Fieldhand: the conversation state machine.
//!
//! # Architecture
//!
//! - [`Conversation`] - message log, the single open stream, playback and
//!   dictation, all driven from one loop through [`Conversation::tick`]
//! - [`reducer::apply`] - folds one envelope into the in-flight message
//! - [`Finalizer`] - commits the terminal message state once per stream
//! - [`PlaybackCoordinator`] - at most one voice session at a time
//! - [`DictationCoordinator`] - speech transcripts into the compose field
//!
//! Nothing here spawns tasks or blocks. Time is passed in by the caller.

mod chunks;
pub mod config;
mod connector;
pub mod dictation;
pub mod errors;
mod finalize;
pub mod playback;
pub mod reducer;
pub mod security;
mod state;
mod streaming;

use std::time::{Duration, Instant, SystemTime};

pub use fieldhand_transport::{StreamHandle, StreamOptions, TransportError, TransportState};
pub use fieldhand_types::{Message, MessageId, NonEmptyString, Role, StreamingEvent};

pub use config::{ConfigError, FieldhandConfig};
pub use connector::{HttpConnector, StreamConnector};
pub use dictation::{DictationCoordinator, DictationError};
pub use errors::{SubmitError, format_stream_error};
pub use finalize::{Finalized, Finalizer, PlaybackRequest, StreamEnd};
pub use playback::{
    AudioHandle, AudioStatus, PlaybackCoordinator, PlaybackError, SessionEnded, SpeechSynthesizer,
};

use state::{ActiveStream, OperationState};

/// Envelopes applied per [`Conversation::process_stream_events`] call.
pub const DEFAULT_STREAM_EVENT_BUDGET: usize = 256;

/// Timing and voice settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub voice_enabled: bool,
    pub playback_delay: Duration,
    pub dictation_debounce: Duration,
    pub event_budget: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            voice_enabled: true,
            playback_delay: Duration::from_millis(config::DEFAULT_PLAYBACK_DELAY_MS),
            dictation_debounce: Duration::from_millis(config::DEFAULT_DEBOUNCE_MS),
            event_budget: DEFAULT_STREAM_EVENT_BUDGET,
        }
    }
}

pub struct Conversation {
    messages: Vec<Message>,
    state: OperationState,
    settings: EngineSettings,
    connector: Box<dyn StreamConnector>,
    finalizer: Finalizer,
    playback: PlaybackCoordinator,
    dictation: DictationCoordinator,
    pending_playback: Option<PlaybackRequest>,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("messages", &self.messages.len())
            .field("state", &self.state)
            .field("settings", &self.settings)
            .field("playback", &self.playback)
            .field("dictation", &self.dictation)
            .field("pending_playback", &self.pending_playback)
            .finish_non_exhaustive()
    }
}

impl Conversation {
    #[must_use]
    pub fn new(
        connector: Box<dyn StreamConnector>,
        synthesizer: Box<dyn SpeechSynthesizer>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            messages: Vec::new(),
            state: OperationState::Idle,
            settings,
            connector,
            finalizer: Finalizer::new(),
            playback: PlaybackCoordinator::new(synthesizer, settings.voice_enabled),
            dictation: DictationCoordinator::new(settings.dictation_debounce),
            pending_playback: None,
        }
    }

    /// Advance everything that is waiting on time or input.
    ///
    /// Call this from the event loop: it applies new envelopes, fires a due
    /// playback, reaps finished audio and fires a due dictation submit.
    pub fn tick(&mut self, now: Instant) {
        self.process_stream_events(now);

        if let Some(ended) = self.playback.poll() {
            tracing::debug!(session = %ended.session, "Playback session released");
        }

        if self.pending_playback.as_ref().is_some_and(|p| p.due <= now)
            && let Some(request) = self.pending_playback.take()
        {
            match self.playback.play(&request.text, request.message_id) {
                Ok(_) | Err(PlaybackError::Disabled) => {}
                Err(e) => tracing::warn!(%e, "Auto playback failed"),
            }
        }

        if let Some(text) = self.dictation.tick(now, self.is_streaming())
            && let Err(e) = self.submit(&text, SystemTime::now())
        {
            tracing::warn!(%e, "Dictated prompt rejected");
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    /// The assistant message still being streamed, if any.
    #[must_use]
    pub fn in_flight(&self) -> Option<&Message> {
        match &self.state {
            OperationState::Streaming(_) => self.messages.last().filter(|m| !m.is_complete()),
            OperationState::Idle => None,
        }
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.state, OperationState::Streaming(_))
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[must_use]
    pub fn pending_playback(&self) -> Option<&PlaybackRequest> {
        self.pending_playback.as_ref()
    }

    #[must_use]
    pub fn playback(&self) -> &PlaybackCoordinator {
        &self.playback
    }

    #[must_use]
    pub fn dictation(&self) -> &DictationCoordinator {
        &self.dictation
    }

    pub fn dictation_mut(&mut self) -> &mut DictationCoordinator {
        &mut self.dictation
    }

    /// Turn voice output on or off. Turning it off silences the current
    /// session and drops a scheduled one.
    pub fn set_voice_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.pending_playback = None;
        }
        self.playback.set_enabled(enabled);
    }

    pub fn toggle_voice(&mut self) -> bool {
        let enabled = !self.playback.is_enabled();
        self.set_voice_enabled(enabled);
        enabled
    }

    /// Read a finished message aloud on request.
    pub fn speak(&mut self, id: MessageId) -> Result<(), PlaybackError> {
        let text = self
            .message(id)
            .filter(|m| m.is_complete() && m.error().is_none())
            .map(|m| m.content().to_string())
            .ok_or(PlaybackError::EmptyText)?;
        self.pending_playback = None;
        self.playback.play(&text, id).map(|_| ())
    }

    pub fn stop_speaking(&mut self) -> bool {
        self.pending_playback = None;
        self.playback.stop()
    }

    /// End dictation; may schedule an auto-submit.
    pub fn stop_dictation(&mut self, now: Instant) {
        let in_flight = self.is_streaming();
        self.dictation.stop_listening(now, in_flight);
    }

    /// Explicitly send the compose field.
    pub fn submit_compose(&mut self, now: SystemTime) -> Result<MessageId, SubmitError> {
        if self.is_streaming() {
            return Err(SubmitError::StreamInFlight);
        }
        let text = self
            .dictation
            .take_for_submit()
            .ok_or(SubmitError::EmptyPrompt)?;
        self.submit(&text, now)
    }
}
