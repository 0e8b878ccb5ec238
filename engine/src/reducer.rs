//! Event reducer: folds one envelope into the in-flight assistant message.
//!
//! [`apply`] must see envelopes exactly once each, in arrival order. It takes
//! the message by value and hands back the next snapshot, so an older
//! snapshot cannot be fed again once a newer one exists. Feeding envelopes
//! out of order is a caller bug with no defined result.
//!
//! Once a message is complete, every further envelope is ignored.

use fieldhand_types::{
    EventPayload, FinalPayload, MetadataPayload, Message, RawVisualization, ResultBundle,
    ResultPayload, StatusUpdate, StreamingEvent, Visualization,
};

use crate::chunks;

#[must_use]
pub fn apply(mut message: Message, event: &StreamingEvent) -> Message {
    if message.is_complete() {
        tracing::debug!(
            event_type = event.kind(),
            "Ignoring envelope for finished message"
        );
        return message;
    }

    let payload = event.payload();
    if !matches!(payload, EventPayload::Heartbeat) {
        message.status_mut().events.push(event.clone());
    }

    match payload {
        EventPayload::Status { update, .. } => apply_status(&mut message, update),
        EventPayload::Metadata(meta) => apply_metadata(&mut message, meta),
        EventPayload::Visualization(raw) => install_visualization(&mut message, raw),
        EventPayload::Result(result) => apply_result(&mut message, result),
        EventPayload::ResultsMeta(meta) => chunks::on_meta(&mut message, meta),
        EventPayload::ResultsChunk(chunk) => chunks::on_chunk(&mut message, chunk),
        EventPayload::ResultsComplete(done) => chunks::on_complete(&mut message, done),
        EventPayload::Complete(final_payload) => {
            apply_final_payload(&mut message, final_payload);
            message.mark_complete();
            tracing::debug!(message_id = %message.id(), "Message completed by envelope");
        }
        EventPayload::Error(err) => {
            let text = err.text().to_string();
            tracing::warn!(message_id = %message.id(), error = %text, "Stream reported error");
            message.fail(text);
        }
        EventPayload::Heartbeat => {}
        EventPayload::Unknown {
            interpretation,
            status_text,
        } => apply_unknown(
            &mut message,
            event.kind(),
            interpretation.as_deref(),
            status_text.as_deref(),
        ),
    }

    message
}

/// Install whatever a terminal payload carries, leaving everything it does
/// not carry untouched.
pub(crate) fn apply_final_payload(message: &mut Message, payload: &FinalPayload) {
    if let Some(text) = payload
        .interpretation
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    {
        set_interpretation(message, text);
    }
    if let Some(raw) = &payload.visualization {
        install_visualization(message, raw);
    }
    match ResultBundle::from_payload(payload.result.as_ref(), payload.data.as_ref()) {
        Some(bundle) => {
            message.set_data(bundle.with_summary(payload.summary.clone()));
            message.status_mut().chunks = None;
        }
        None => {
            if let Some(summary) = &payload.summary
                && message.data().is_some()
            {
                message.data_mut().summary = Some(summary.clone());
            }
        }
    }
}

/// Status text always feeds the progress line. It also fills `content`
/// until an interpretation has been installed.
pub(crate) fn set_status_text(message: &mut Message, text: &str) {
    let status = message.status_mut();
    status.current_message = text.to_string();
    if !status.has_interpretation {
        message.set_content(text);
    }
}

/// Unrecognized envelopes still speak for the answer: an interpretation is
/// installed as one, and bare status text replaces `content` outright.
fn apply_unknown(
    message: &mut Message,
    kind: &str,
    interpretation: Option<&str>,
    status_text: Option<&str>,
) {
    if interpretation.is_none() && status_text.is_none() {
        tracing::debug!(event_type = kind, "Ignoring envelope");
        return;
    }
    tracing::debug!(event_type = kind, "Applying text from unrecognized envelope");
    if let Some(text) = status_text {
        message.status_mut().current_message = text.to_string();
    }
    match interpretation {
        Some(text) => set_interpretation(message, text),
        None => {
            if let Some(text) = status_text {
                message.set_content(text);
            }
        }
    }
}

fn set_interpretation(message: &mut Message, text: &str) {
    message.set_content(text);
    message.status_mut().has_interpretation = true;
}

fn apply_status(message: &mut Message, update: &StatusUpdate) {
    let status = message.status_mut();
    if update.step.is_some() {
        status.step = update.step;
    }
    if update.total.is_some() {
        status.total_steps = update.total;
    }
    if let Some(text) = update.message.as_deref().filter(|t| !t.trim().is_empty()) {
        set_status_text(message, text);
    }
}

fn apply_metadata(message: &mut Message, meta: &MetadataPayload) {
    if !meta.audit.is_empty() {
        let fields: Vec<&str> = meta.audit.keys().map(String::as_str).collect();
        tracing::debug!(?fields, "Pipeline metadata received");
    }

    match meta
        .interpretation
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    {
        Some(text) => set_interpretation(message, text),
        None => {
            if let Some(text) = meta.message.as_deref().filter(|t| !t.trim().is_empty()) {
                set_status_text(message, text);
            }
        }
    }

    if let Some(raw) = &meta.visualization {
        install_visualization(message, raw);
    }
}

fn install_visualization(message: &mut Message, raw: &RawVisualization) {
    match Visualization::try_from(raw.clone()) {
        Ok(visualization) => {
            tracing::debug!(kind = %visualization.kind, "Visualization installed");
            message.set_visualization(visualization);
        }
        Err(e) => tracing::warn!(%e, "Discarding visualization"),
    }
}

fn apply_result(message: &mut Message, payload: &ResultPayload) {
    match ResultBundle::from_payload(payload.result.as_ref(), payload.data.as_ref()) {
        Some(bundle) => {
            tracing::debug!(rows = bundle.len(), "Result set installed");
            message.set_data(bundle.with_summary(payload.summary.clone()));
            message.status_mut().chunks = None;
        }
        None => tracing::warn!("Result envelope carried no rows"),
    }
    if let Some(text) = payload.message.as_deref().filter(|t| !t.trim().is_empty()) {
        message.status_mut().current_message = text.to_string();
    }
}
