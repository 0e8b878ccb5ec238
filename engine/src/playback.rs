//! Voice playback coordination.
//!
//! At most one playback session exists at a time. Starting a new one stops
//! the current one first, and every session carries a [`PlaybackSessionId`]
//! so a late completion from a preempted session cannot clear its successor.

use thiserror::Error;

use fieldhand_types::{MessageId, PlaybackSessionId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("voice output is disabled")]
    Disabled,
    #[error("nothing to speak")]
    EmptyText,
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioStatus {
    Playing,
    Finished,
    Failed(String),
}

/// A running piece of audio.
pub trait AudioHandle: Send {
    /// Stop output. Must tolerate being called after the audio ended.
    fn stop(&mut self);

    fn status(&mut self) -> AudioStatus;
}

/// Text-to-speech backend.
pub trait SpeechSynthesizer: Send {
    fn start(
        &mut self,
        text: &str,
        session: PlaybackSessionId,
    ) -> Result<Box<dyn AudioHandle>, PlaybackError>;
}

struct ActiveSession {
    id: PlaybackSessionId,
    message_id: MessageId,
    handle: Box<dyn AudioHandle>,
}

/// How a session ended, reported by [`PlaybackCoordinator::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnded {
    pub session: PlaybackSessionId,
    pub message_id: MessageId,
    pub error: Option<String>,
}

pub struct PlaybackCoordinator {
    synthesizer: Box<dyn SpeechSynthesizer>,
    enabled: bool,
    active: Option<ActiveSession>,
    last_session: PlaybackSessionId,
}

impl std::fmt::Debug for PlaybackCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackCoordinator")
            .field("enabled", &self.enabled)
            .field("active_session", &self.active_session())
            .field("active_message_id", &self.active_message_id())
            .finish_non_exhaustive()
    }
}

impl PlaybackCoordinator {
    #[must_use]
    pub fn new(synthesizer: Box<dyn SpeechSynthesizer>, enabled: bool) -> Self {
        Self {
            synthesizer,
            enabled,
            active: None,
            last_session: PlaybackSessionId::new(0),
        }
    }

    /// Speak `text` for `message_id`, preempting any current session.
    pub fn play(
        &mut self,
        text: &str,
        message_id: MessageId,
    ) -> Result<PlaybackSessionId, PlaybackError> {
        if !self.enabled {
            return Err(PlaybackError::Disabled);
        }
        if text.trim().is_empty() {
            return Err(PlaybackError::EmptyText);
        }

        self.stop();

        let session = self.last_session.next();
        self.last_session = session;
        let handle = self.synthesizer.start(text, session).inspect_err(|e| {
            tracing::warn!(%e, %session, "Playback failed to start");
        })?;
        tracing::debug!(%session, %message_id, "Playback started");
        self.active = Some(ActiveSession {
            id: session,
            message_id,
            handle,
        });
        Ok(session)
    }

    /// Stop the active session. Returns whether there was one.
    pub fn stop(&mut self) -> bool {
        let Some(mut active) = self.active.take() else {
            return false;
        };
        active.handle.stop();
        tracing::debug!(session = %active.id, "Playback stopped");
        true
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.stop();
        }
        self.enabled = enabled;
    }

    /// Flip voice output. Returns the new state.
    pub fn toggle_enabled(&mut self) -> bool {
        self.set_enabled(!self.enabled);
        self.enabled
    }

    /// Check the active audio and release it once it has ended.
    pub fn poll(&mut self) -> Option<SessionEnded> {
        let active = self.active.as_mut()?;
        let error = match active.handle.status() {
            AudioStatus::Playing => return None,
            AudioStatus::Finished => None,
            AudioStatus::Failed(e) => Some(e),
        };
        let session = active.id;
        self.end_session(session, error)
    }

    /// Report that the audio for `session` ended, for backends that signal
    /// completion instead of being polled. Stale sessions are ignored.
    pub fn on_audio_ended(
        &mut self,
        session: PlaybackSessionId,
        error: Option<String>,
    ) -> Option<SessionEnded> {
        self.end_session(session, error)
    }

    fn end_session(
        &mut self,
        session: PlaybackSessionId,
        error: Option<String>,
    ) -> Option<SessionEnded> {
        if self.active.as_ref().is_none_or(|a| a.id != session) {
            tracing::debug!(%session, "Ignoring end of stale playback session");
            return None;
        }
        let active = self.active.take()?;
        match &error {
            Some(e) => tracing::warn!(%session, error = %e, "Playback failed"),
            None => tracing::debug!(%session, "Playback finished"),
        }
        Some(SessionEnded {
            session,
            message_id: active.message_id,
            error,
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn active_message_id(&self) -> Option<MessageId> {
        self.active.as_ref().map(|a| a.message_id)
    }

    #[must_use]
    pub fn active_session(&self) -> Option<PlaybackSessionId> {
        self.active.as_ref().map(|a| a.id)
    }
}
