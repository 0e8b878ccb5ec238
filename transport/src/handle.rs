//! Append-only event log shared between a stream task and its reader.
//!
//! The producing task holds a [`StreamFeed`]; the engine holds the matching
//! [`StreamHandle`]. Envelopes are only ever appended, so a reader can
//! re-read the log from any offset at any time.
//!
//! State transitions are one-way: `Streaming` moves to exactly one of
//! `Finished`, `Stopped` or `Failed`, and nothing is appended afterwards.
//! Because the feed appends before it transitions, a reader that observes a
//! terminal state and then reads the log sees every envelope.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::AbortHandle;

use fieldhand_types::{FinalPayload, StreamingEvent};

use crate::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    /// Connection open, envelopes may still arrive.
    Streaming,
    /// The server closed the stream.
    Finished,
    /// The reader called [`StreamHandle::stop`].
    Stopped,
    /// Network failure, non-success status, or stream-level fault.
    Failed(TransportError),
}

impl TransportState {
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, TransportState::Streaming)
    }
}

#[derive(Debug)]
struct Inner {
    events: Vec<StreamingEvent>,
    state: TransportState,
    final_payload: Option<FinalPayload>,
    dropped: usize,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Writer half of a stream.
#[derive(Debug, Clone)]
pub struct StreamFeed {
    shared: Arc<Shared>,
}

impl StreamFeed {
    /// Append an envelope. Returns `false` once the stream is no longer
    /// streaming; the envelope is discarded in that case.
    pub fn push(&self, event: StreamingEvent) -> bool {
        let mut inner = self.shared.lock();
        if !inner.state.is_streaming() {
            return false;
        }
        inner.events.push(event);
        true
    }

    /// Retain the trailing payload object some streams end with.
    pub fn set_final_payload(&self, payload: FinalPayload) -> bool {
        let mut inner = self.shared.lock();
        if !inner.state.is_streaming() {
            return false;
        }
        inner.final_payload = Some(payload);
        true
    }

    /// Count a record that could not be decoded.
    pub fn record_dropped(&self) {
        let mut inner = self.shared.lock();
        inner.dropped = inner.dropped.saturating_add(1);
    }

    /// Server closed the stream.
    pub fn finish(&self) {
        self.transition(TransportState::Finished);
    }

    pub fn fail(&self, error: TransportError) {
        self.transition(TransportState::Failed(error));
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.lock().state.is_streaming()
    }

    fn transition(&self, next: TransportState) {
        let mut inner = self.shared.lock();
        if inner.state.is_streaming() {
            inner.state = next;
        }
    }
}

/// Reader half of a stream: the log plus the stop switch.
#[derive(Debug)]
pub struct StreamHandle {
    shared: Arc<Shared>,
    abort: Option<AbortHandle>,
}

/// A connected feed/handle pair with no task behind it.
///
/// Used by [`crate::open`] and by callers that produce envelopes themselves.
#[must_use]
pub fn channel() -> (StreamFeed, StreamHandle) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            events: Vec::new(),
            state: TransportState::Streaming,
            final_payload: None,
            dropped: 0,
        }),
    });
    (
        StreamFeed {
            shared: Arc::clone(&shared),
        },
        StreamHandle {
            shared,
            abort: None,
        },
    )
}

impl StreamHandle {
    pub(crate) fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Number of envelopes appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `max` envelopes starting at `offset`, in arrival order.
    #[must_use]
    pub fn events_from(&self, offset: usize, max: usize) -> Vec<StreamingEvent> {
        let inner = self.shared.lock();
        inner
            .events
            .iter()
            .skip(offset)
            .take(max)
            .cloned()
            .collect()
    }

    /// The whole log as of now.
    #[must_use]
    pub fn events(&self) -> Vec<StreamingEvent> {
        self.shared.lock().events.clone()
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.shared.lock().state.clone()
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.shared.lock().state.is_streaming()
    }

    #[must_use]
    pub fn final_payload(&self) -> Option<FinalPayload> {
        self.shared.lock().final_payload.clone()
    }

    #[must_use]
    pub fn error(&self) -> Option<TransportError> {
        match &self.shared.lock().state {
            TransportState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Records that were dropped because they could not be decoded.
    #[must_use]
    pub fn dropped_records(&self) -> usize {
        self.shared.lock().dropped
    }

    /// Abort the connection.
    ///
    /// Safe to call at any time and any number of times. After a natural end
    /// it changes nothing. No completion envelope is synthesized.
    pub fn stop(&self) {
        let stopped = {
            let mut inner = self.shared.lock();
            if inner.state.is_streaming() {
                inner.state = TransportState::Stopped;
                true
            } else {
                false
            }
        };
        if stopped {
            tracing::debug!(events = self.len(), "Stream stopped by reader");
        }
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }
}
