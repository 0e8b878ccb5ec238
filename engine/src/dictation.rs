//! Speech-to-text input coordination.
//!
//! Recognition results arrive as interim fragments (replaced on every
//! update) and final fragments (appended). While listening, the compose
//! field mirrors `final + interim`. When listening stops with a non-empty
//! final transcript and nothing in flight, an auto-submit is scheduled after
//! a debounce. Editing the compose field cancels that timer; the edited text
//! is then sent only by an explicit submit, so the same text never goes out
//! twice.

use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DictationError {
    #[error("dictation is already listening")]
    AlreadyListening,
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no speech detected")]
    NoSpeech,
    #[error("speech recognition failed: {0}")]
    Recognition(String),
}

#[derive(Debug, Clone)]
pub struct DictationCoordinator {
    interim: String,
    final_transcript: String,
    listening: bool,
    compose: String,
    debounce: Duration,
    auto_submit_at: Option<Instant>,
    notice: Option<String>,
}

impl DictationCoordinator {
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            interim: String::new(),
            final_transcript: String::new(),
            listening: false,
            compose: String::new(),
            debounce,
            auto_submit_at: None,
            notice: None,
        }
    }

    pub fn start_listening(&mut self) -> Result<(), DictationError> {
        if self.listening {
            return Err(DictationError::AlreadyListening);
        }
        self.listening = true;
        self.notice = None;
        self.auto_submit_at = None;
        tracing::debug!("Dictation started");
        Ok(())
    }

    /// Replace the interim fragment.
    pub fn on_interim(&mut self, text: &str) {
        if !self.listening {
            return;
        }
        self.interim = text.to_string();
        self.mirror();
    }

    /// Append a final fragment and drop the interim one it supersedes.
    pub fn on_final(&mut self, text: &str) {
        if !self.listening {
            return;
        }
        let text = text.trim();
        if !text.is_empty() {
            if !self.final_transcript.is_empty() {
                self.final_transcript.push(' ');
            }
            self.final_transcript.push_str(text);
        }
        self.interim.clear();
        self.mirror();
    }

    /// End of utterance.
    ///
    /// Schedules an auto-submit at `now + debounce` when there is a final
    /// transcript and `submission_in_flight` is false.
    pub fn stop_listening(&mut self, now: Instant, submission_in_flight: bool) {
        if !self.listening {
            return;
        }
        self.listening = false;
        self.interim.clear();
        self.compose.clone_from(&self.final_transcript);

        if self.final_transcript.trim().is_empty() {
            tracing::debug!("Dictation stopped with nothing to send");
        } else if submission_in_flight {
            tracing::debug!("Dictation stopped while a response is streaming; not auto-submitting");
        } else {
            self.auto_submit_at = Some(now + self.debounce);
        }
    }

    /// A manual edit of the compose field. Cancels any pending auto-submit.
    pub fn edit_compose(&mut self, text: impl Into<String>) {
        self.compose = text.into();
        if self.auto_submit_at.take().is_some() {
            tracing::debug!("Auto-submit cancelled by manual edit");
        }
    }

    /// Explicit submit. Takes the compose text and resets the transcripts.
    pub fn take_for_submit(&mut self) -> Option<String> {
        self.auto_submit_at = None;
        let text = std::mem::take(&mut self.compose);
        self.final_transcript.clear();
        self.interim.clear();
        (!text.trim().is_empty()).then_some(text)
    }

    /// Fire the auto-submit once its deadline has passed.
    ///
    /// Returns the text to send. If a submission started in the meantime the
    /// timer is dropped and the text stays in the compose field.
    pub fn tick(&mut self, now: Instant, submission_in_flight: bool) -> Option<String> {
        let due = self.auto_submit_at?;
        if now < due {
            return None;
        }
        self.auto_submit_at = None;
        if submission_in_flight {
            tracing::debug!("Auto-submit skipped; a response is streaming");
            return None;
        }
        self.take_for_submit()
    }

    /// Recognition failed. Listening ends and a notice is shown; nothing
    /// else is touched.
    pub fn on_error(&mut self, error: &DictationError) {
        tracing::warn!(%error, "Dictation error");
        self.listening = false;
        self.interim.clear();
        self.compose.clone_from(&self.final_transcript);
        self.notice = Some(error.to_string());
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    fn mirror(&mut self) {
        self.compose.clone_from(&self.final_transcript);
        if !self.interim.is_empty() {
            if !self.compose.is_empty() {
                self.compose.push(' ');
            }
            self.compose.push_str(&self.interim);
        }
    }

    #[must_use]
    pub fn compose(&self) -> &str {
        &self.compose
    }

    #[must_use]
    pub fn interim(&self) -> &str {
        &self.interim
    }

    #[must_use]
    pub fn final_transcript(&self) -> &str {
        &self.final_transcript
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    #[must_use]
    pub fn auto_submit_at(&self) -> Option<Instant> {
        self.auto_submit_at
    }

    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }
}
