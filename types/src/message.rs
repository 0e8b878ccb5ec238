//! Conversation message model.
//!
//! A [`Message`] is one conversational turn. User turns are complete from the
//! moment they exist. Assistant turns start as a placeholder with
//! `is_complete == false` and are driven to completion by the engine.
//! Constructors take `SystemTime` explicitly; callers own the clock.

use std::time::SystemTime;

use serde::Serialize;

use crate::envelope::StreamingEvent;
use crate::ids::MessageId;
use crate::results::{ChunkProgress, ResultBundle};
use crate::visualization::Visualization;
use crate::NonEmptyString;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Live progress of an assistant turn while its stream is open.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingStatus {
    /// True until a `complete` or `error` envelope is folded in.
    pub is_active: bool,
    pub step: Option<u32>,
    pub total_steps: Option<u32>,
    pub current_message: String,
    /// Set once interpretation text owns `content`; status text stops
    /// overwriting it from then on.
    pub has_interpretation: bool,
    /// Every envelope applied to this message, in arrival order.
    pub events: Vec<StreamingEvent>,
    /// Present once the chunked result protocol has started.
    pub chunks: Option<ChunkProgress>,
}

impl StreamingStatus {
    #[must_use]
    pub fn started() -> Self {
        Self {
            is_active: true,
            step: None,
            total_steps: None,
            current_message: String::new(),
            has_interpretation: false,
            events: Vec::new(),
            chunks: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: MessageId,
    role: Role,
    content: String,
    visualizations: Vec<Visualization>,
    data: Option<ResultBundle>,
    streaming_status: Option<StreamingStatus>,
    is_complete: bool,
    error: Option<String>,
    timestamp: SystemTime,
}

impl Message {
    #[must_use]
    pub fn user(content: NonEmptyString, timestamp: SystemTime) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into_inner(),
            visualizations: Vec::new(),
            data: None,
            streaming_status: None,
            is_complete: true,
            error: None,
            timestamp,
        }
    }

    /// The in-flight assistant turn created when a stream opens.
    #[must_use]
    pub fn assistant_placeholder(timestamp: SystemTime) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: String::new(),
            visualizations: Vec::new(),
            data: None,
            streaming_status: Some(StreamingStatus::started()),
            is_complete: false,
            error: None,
            timestamp,
        }
    }

    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn visualizations(&self) -> &[Visualization] {
        &self.visualizations
    }

    #[must_use]
    pub fn data(&self) -> Option<&ResultBundle> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn streaming_status(&self) -> Option<&StreamingStatus> {
        self.streaming_status.as_ref()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Replace the content wholesale.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }

    /// Install `visualization` as the sole visualization.
    pub fn set_visualization(&mut self, visualization: Visualization) {
        self.visualizations.clear();
        self.visualizations.push(visualization);
    }

    pub fn set_data(&mut self, data: ResultBundle) {
        self.data = Some(data);
    }

    pub fn clear_data(&mut self) {
        self.data = None;
    }

    /// The result bundle being accumulated, created empty if absent.
    pub fn data_mut(&mut self) -> &mut ResultBundle {
        self.data.get_or_insert_with(ResultBundle::default)
    }

    /// Live status, created if this message had none.
    pub fn status_mut(&mut self) -> &mut StreamingStatus {
        self.streaming_status
            .get_or_insert_with(StreamingStatus::started)
    }

    /// Mark the turn finished. There is no way back.
    pub fn mark_complete(&mut self) {
        self.is_complete = true;
        if let Some(status) = self.streaming_status.as_mut() {
            status.is_active = false;
        }
    }

    /// Record a terminal failure and mark the turn finished.
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.content = if self.content.trim().is_empty() {
            format!("Error: {error}")
        } else {
            format!("Error: {error}\n\n{}", self.content)
        };
        self.error = Some(error);
        self.mark_complete();
    }
}
