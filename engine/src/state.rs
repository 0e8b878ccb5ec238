//! Operation state machine types.

use fieldhand_transport::StreamHandle;
use fieldhand_types::MessageId;

/// The one open stream and how far into its log the reducer has got.
#[derive(Debug)]
pub(crate) struct ActiveStream {
    pub(crate) handle: StreamHandle,
    /// Envelopes `[0, cursor)` have been applied.
    pub(crate) cursor: usize,
    pub(crate) message_id: MessageId,
}

impl ActiveStream {
    pub(crate) fn new(handle: StreamHandle, message_id: MessageId) -> Self {
        Self {
            handle,
            cursor: 0,
            message_id,
        }
    }

    /// True when every envelope appended so far has been applied.
    pub(crate) fn drained(&self) -> bool {
        self.cursor >= self.handle.len()
    }
}

#[derive(Debug, Default)]
pub(crate) enum OperationState {
    #[default]
    Idle,
    Streaming(ActiveStream),
}
