//! Terminal stand-in for a speech engine.
//!
//! Writes what would be spoken to stderr and reports the audio as finished
//! once an estimated speaking time has passed.

use std::io::Write;
use std::time::{Duration, Instant};

use fieldhand_engine::{AudioHandle, AudioStatus, PlaybackError, SpeechSynthesizer};
use fieldhand_types::PlaybackSessionId;

/// Rough speaking rate used to estimate how long a session lasts.
const WORDS_PER_SECOND: f64 = 2.5;

#[derive(Debug, Default)]
pub struct TranscriptSpeaker;

struct TranscriptAudio {
    session: PlaybackSessionId,
    ends_at: Instant,
    stopped: bool,
}

impl AudioHandle for TranscriptAudio {
    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            tracing::debug!(session = %self.session, "Transcript playback interrupted");
        }
    }

    fn status(&mut self) -> AudioStatus {
        if self.stopped || Instant::now() >= self.ends_at {
            AudioStatus::Finished
        } else {
            AudioStatus::Playing
        }
    }
}

pub(crate) fn speaking_time(text: &str) -> Duration {
    let words = text.split_whitespace().count() as f64;
    Duration::from_secs_f64(words / WORDS_PER_SECOND)
}

impl SpeechSynthesizer for TranscriptSpeaker {
    fn start(
        &mut self,
        text: &str,
        session: PlaybackSessionId,
    ) -> Result<Box<dyn AudioHandle>, PlaybackError> {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "[voice] {text}").map_err(|e| PlaybackError::Synthesis(e.to_string()))?;
        Ok(Box::new(TranscriptAudio {
            session,
            ends_at: Instant::now() + speaking_time(text),
            stopped: false,
        }))
    }
}
