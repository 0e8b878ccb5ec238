//! Plain-text rendering of assistant messages.

use std::fmt::Write;

use fieldhand_engine::security::sanitize_display_text;
use fieldhand_types::{Message, StreamingStatus};

/// One progress line for stderr, or `None` when nothing is known yet.
pub fn progress_line(status: &StreamingStatus) -> Option<String> {
    let text = sanitize_display_text(status.current_message.trim()).into_owned();
    if text.is_empty() {
        return None;
    }
    Some(match (status.step, status.total_steps) {
        (Some(step), Some(total)) => format!("[{step}/{total}] {text}"),
        _ => text,
    })
}

/// The finished answer as it is printed to stdout.
pub fn final_message(message: &Message) -> String {
    let mut out = sanitize_display_text(message.content().trim()).into_owned();

    for visualization in message.visualizations() {
        let title = visualization
            .title
            .as_deref()
            .map(|t| sanitize_display_text(t).into_owned())
            .unwrap_or_default();
        let _ = write!(out, "\n\nChart: {}", visualization.kind);
        if !title.is_empty() {
            let _ = write!(out, " - {title}");
        }
    }

    if let Some(data) = message.data() {
        let _ = write!(out, "\n\nRows: {}", data.len());
        if let Some(summary) = data.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            let _ = write!(out, "\nSummary: {}", sanitize_display_text(summary));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use fieldhand_engine::reducer::apply;
    use fieldhand_types::{Message, StreamingEvent, StreamingStatus};
    use serde_json::json;

    use super::{final_message, progress_line};

    #[test]
    fn progress_line_includes_step_counter() {
        let mut status = StreamingStatus::started();
        assert_eq!(progress_line(&status), None);

        status.current_message = "Running query".to_string();
        assert_eq!(progress_line(&status).as_deref(), Some("Running query"));

        status.step = Some(3);
        status.total_steps = Some(5);
        assert_eq!(progress_line(&status).as_deref(), Some("[3/5] Running query"));
    }

    #[test]
    fn final_message_lists_chart_and_rows() {
        let message = [
            StreamingEvent::new(
                "metadata",
                json!({
                    "interpretation": "East field \u{1b}[31myields\u{1b}[0m most",
                    "visualization": {
                        "type": "bar",
                        "config": {"labels": ["east"], "datasets": [{"data": [4]}]},
                        "title": "Yield"
                    }
                }),
                None,
            ),
            StreamingEvent::new(
                "result",
                json!({"result": [{"f": "east"}, {"f": "west"}], "summary": "2 fields"}),
                None,
            ),
        ]
        .iter()
        .fold(Message::assistant_placeholder(SystemTime::UNIX_EPOCH), apply);

        assert_eq!(
            final_message(&message),
            "East field yields most\n\nChart: bar - Yield\n\nRows: 2\nSummary: 2 fields"
        );
    }
}
