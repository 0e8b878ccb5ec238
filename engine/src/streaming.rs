//! Streaming response handling for the Conversation.

use std::time::{Instant, SystemTime};

use fieldhand_types::{Message, MessageId, NonEmptyString, StreamingEvent};

use super::{ActiveStream, Conversation, OperationState, SubmitError};
use crate::finalize::StreamEnd;
use crate::reducer;

/// Fold `events` into the in-flight message, which is always the last entry
/// of the log while a stream is open. Returns whether it is now complete.
fn fold_into_in_flight(messages: &mut Vec<Message>, events: &[StreamingEvent]) -> bool {
    let Some(message) = messages.pop() else {
        tracing::error!("No in-flight message to apply envelopes to");
        return false;
    };
    let message = events.iter().fold(message, reducer::apply);
    let complete = message.is_complete();
    messages.push(message);
    complete
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Streaming,
    Legacy,
}

impl Conversation {
    /// Send `prompt` over the streaming endpoint.
    ///
    /// Appends the user turn and an assistant placeholder, then opens the
    /// stream. Returns the placeholder's id.
    pub fn submit(&mut self, prompt: &str, now: SystemTime) -> Result<MessageId, SubmitError> {
        self.start(prompt, now, Endpoint::Streaming)
    }

    /// Send `prompt` over the non-streaming fallback endpoint.
    pub fn submit_legacy(
        &mut self,
        prompt: &str,
        now: SystemTime,
    ) -> Result<MessageId, SubmitError> {
        self.start(prompt, now, Endpoint::Legacy)
    }

    fn start(
        &mut self,
        prompt: &str,
        now: SystemTime,
        endpoint: Endpoint,
    ) -> Result<MessageId, SubmitError> {
        if self.is_streaming() {
            tracing::warn!("Rejected prompt while a response is streaming");
            return Err(SubmitError::StreamInFlight);
        }
        let prompt = NonEmptyString::new(prompt.trim()).map_err(|_| SubmitError::EmptyPrompt)?;

        // A new question interrupts any answer still being read out.
        self.pending_playback = None;
        self.playback.stop();

        let handle = match endpoint {
            Endpoint::Streaming => self.connector.open(prompt.as_str()),
            Endpoint::Legacy => self.connector.open_legacy(prompt.as_str()),
        };
        let placeholder = Message::assistant_placeholder(now);
        let message_id = placeholder.id();

        self.messages.push(Message::user(prompt, now));
        self.messages.push(placeholder);
        self.state = OperationState::Streaming(ActiveStream::new(handle, message_id));

        tracing::info!(%message_id, ?endpoint, "Prompt submitted");
        Ok(message_id)
    }

    /// Apply envelopes that have arrived since the last call.
    ///
    /// At most `event_budget` envelopes are applied per call; the rest wait
    /// for the next call, still in order. Finalizes once the stream has
    /// ended and its log is fully applied, or as soon as a `complete` or
    /// `error` envelope has been applied.
    pub fn process_stream_events(&mut self, now: Instant) {
        let budget = self.settings.event_budget.max(1);
        let OperationState::Streaming(active) = &mut self.state else {
            return;
        };

        // Read the state before the log: everything appended before a
        // terminal transition is then visible in the read that follows.
        let transport_state = active.handle.state();
        let batch = active.handle.events_from(active.cursor, budget);
        active.cursor += batch.len();
        let drained = active.drained();

        let complete = !batch.is_empty() && fold_into_in_flight(&mut self.messages, &batch);
        if complete || (!transport_state.is_streaming() && drained) {
            self.finish_streaming(now, false);
        }
    }

    /// Abort the open stream and finalize from whatever was accumulated.
    ///
    /// Returns `false` when nothing was streaming.
    pub fn stop_streaming(&mut self, now: Instant) -> bool {
        if !self.is_streaming() {
            return false;
        }
        tracing::info!("Stopping stream at user request");
        self.finish_streaming(now, true);
        true
    }

    fn finish_streaming(&mut self, now: Instant, user_stop: bool) {
        let OperationState::Streaming(active) = std::mem::take(&mut self.state) else {
            return;
        };
        active.handle.stop();

        // Nothing can be appended after stop; apply what is left.
        let remaining = active.handle.events_from(active.cursor, usize::MAX);
        if !remaining.is_empty() {
            fold_into_in_flight(&mut self.messages, &remaining);
        }

        let end = match StreamEnd::from_transport(active.handle.state(), active.handle.final_payload())
        {
            // The server may have closed just before the user asked to stop.
            Some(StreamEnd::Closed(payload)) if user_stop => StreamEnd::Stopped(payload),
            Some(end) => end,
            None => StreamEnd::Stopped(None),
        };
        let dropped = active.handle.dropped_records();

        let Some(message) = self.messages.pop() else {
            tracing::error!("In-flight message missing at finalization");
            return;
        };
        let finalized = self.finalizer.finalize(
            message,
            end,
            self.playback.is_enabled(),
            self.settings.playback_delay,
            now,
        );
        tracing::info!(
            message_id = %active.message_id,
            envelopes = active.handle.len(),
            dropped,
            error = finalized.message.error().is_some(),
            "Response finalized"
        );
        self.messages.push(finalized.message);
        if let Some(request) = finalized.playback {
            self.pending_playback = Some(request);
        }
    }
}
