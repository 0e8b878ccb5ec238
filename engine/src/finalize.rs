//! Stream termination.
//!
//! Runs once the transport stops streaming and every envelope in its log has
//! been applied. A message already finished by a `complete` or `error`
//! envelope is left alone; otherwise termination is synthesized from the
//! trailing payload object (if any) or from what was accumulated.

use std::time::{Duration, Instant};

use fieldhand_transport::{TransportError, TransportState};
use fieldhand_types::{FinalPayload, Message, MessageId};

use crate::errors::format_stream_error;
use crate::reducer::apply_final_payload;

/// How the stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    /// Server closed the connection.
    Closed(Option<FinalPayload>),
    /// The user called stop.
    Stopped(Option<FinalPayload>),
    Failed(TransportError),
}

impl StreamEnd {
    /// Map a finished transport to its ending. `None` while still streaming.
    #[must_use]
    pub fn from_transport(state: TransportState, final_payload: Option<FinalPayload>) -> Option<Self> {
        match state {
            TransportState::Streaming => None,
            TransportState::Finished => Some(StreamEnd::Closed(final_payload)),
            TransportState::Stopped => Some(StreamEnd::Stopped(final_payload)),
            TransportState::Failed(err) => Some(StreamEnd::Failed(err)),
        }
    }
}

/// Playback scheduled by a successful finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    pub message_id: MessageId,
    pub text: String,
    pub due: Instant,
}

#[derive(Debug)]
pub struct Finalized {
    pub message: Message,
    pub playback: Option<PlaybackRequest>,
}

/// Remembers the last message handed to playback. Only one stream is ever
/// in flight, so a repeat can only be the most recent id.
#[derive(Debug, Default)]
pub struct Finalizer {
    last_voiced: Option<MessageId>,
}

impl Finalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit the terminal state of `message`.
    ///
    /// Playback is requested at most once per message id, only when the
    /// message finished without error, `voice_enabled` holds, and the user
    /// did not stop the stream.
    pub fn finalize(
        &mut self,
        mut message: Message,
        end: StreamEnd,
        voice_enabled: bool,
        playback_delay: Duration,
        now: Instant,
    ) -> Finalized {
        let user_stopped = if message.is_complete() {
            tracing::debug!(message_id = %message.id(), "Message already terminal");
            false
        } else {
            match end {
                StreamEnd::Failed(err) => {
                    let text = format_stream_error(&err);
                    tracing::warn!(message_id = %message.id(), %err, "Stream failed");
                    message.fail(text);
                    false
                }
                StreamEnd::Closed(payload) => {
                    close(&mut message, payload.as_ref());
                    false
                }
                StreamEnd::Stopped(payload) => {
                    close(&mut message, payload.as_ref());
                    true
                }
            }
        };

        let playback = if message.error().is_none() && voice_enabled && !user_stopped {
            self.schedule(&message, now + playback_delay)
        } else {
            None
        };

        Finalized { message, playback }
    }

    fn schedule(&mut self, message: &Message, due: Instant) -> Option<PlaybackRequest> {
        if message.content().trim().is_empty() {
            return None;
        }
        if self.last_voiced == Some(message.id()) {
            tracing::debug!(message_id = %message.id(), "Playback already scheduled once");
            return None;
        }
        self.last_voiced = Some(message.id());
        Some(PlaybackRequest {
            message_id: message.id(),
            text: message.content().to_string(),
            due,
        })
    }
}

fn close(message: &mut Message, payload: Option<&FinalPayload>) {
    if let Some(payload) = payload {
        apply_final_payload(message, payload);
    }
    message.mark_complete();
    tracing::debug!(
        message_id = %message.id(),
        trailing_payload = payload.is_some(),
        "Message finalized without completion envelope"
    );
}
