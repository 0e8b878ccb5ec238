//! Server-sent event framing.
//!
//! Records are separated by a blank line (`\n\n` or `\r\n\r\n`). Only `data:`
//! lines matter; multiple data lines in one record are joined with `\n`.

use serde_json::Value;

use fieldhand_types::{FinalPayload, StreamingEvent};

use crate::TransportError;

/// One decoded SSE record.
#[derive(Debug)]
pub(crate) enum SseRecord {
    Envelope(StreamingEvent),
    /// A bare payload object with no `type`; some streams end with one.
    FinalPayload(FinalPayload),
    /// The `[DONE]` marker.
    Done,
    /// Comment, keep-alive, or a record without data lines.
    Skip,
    Malformed(String),
}

#[derive(Debug)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    limit_bytes: usize,
}

impl SseDecoder {
    pub(crate) fn new(limit_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit_bytes,
        }
    }

    /// Append raw bytes. Fails when the buffer grows past the limit without
    /// containing a complete record.
    pub(crate) fn extend(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > self.limit_bytes && find_boundary(&self.buffer).is_none() {
            return Err(TransportError::BufferOverflow {
                limit_bytes: self.limit_bytes,
            });
        }
        Ok(())
    }

    /// Next complete record, if the buffer holds one.
    pub(crate) fn next_record(&mut self) -> Option<SseRecord> {
        let (pos, delim_len) = find_boundary(&self.buffer)?;
        let raw: Vec<u8> = self.buffer.drain(..pos + delim_len).take(pos).collect();
        Some(decode_record(&raw))
    }

    /// Whatever is left once the connection closes.
    pub(crate) fn finish(&mut self) -> Option<SseRecord> {
        let raw = std::mem::take(&mut self.buffer);
        if raw.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(decode_record(&raw))
    }
}

fn find_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn extract_data(record: &str) -> Option<String> {
    let mut lines = record
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .peekable();
    lines.peek()?;
    Some(lines.collect::<Vec<_>>().join("\n"))
}

fn decode_record(raw: &[u8]) -> SseRecord {
    let Ok(text) = std::str::from_utf8(raw) else {
        return SseRecord::Malformed("record is not valid UTF-8".to_string());
    };
    let Some(data) = extract_data(text) else {
        return SseRecord::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        return SseRecord::Skip;
    }
    if data == "[DONE]" {
        return SseRecord::Done;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => return SseRecord::Malformed(format!("invalid JSON: {e}")),
    };
    classify(value)
}

fn classify(value: Value) -> SseRecord {
    let Some(object) = value.as_object() else {
        return SseRecord::Malformed("record is not a JSON object".to_string());
    };
    match object.get("type") {
        Some(Value::String(_)) => match StreamingEvent::from_value(value) {
            Ok(event) => SseRecord::Envelope(event),
            Err(e) => SseRecord::Malformed(e.to_string()),
        },
        Some(_) => SseRecord::Malformed("`type` is not a string".to_string()),
        None => match serde_json::from_value(value) {
            Ok(payload) => SseRecord::FinalPayload(payload),
            Err(e) => SseRecord::Malformed(format!("invalid final payload: {e}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{SseDecoder, SseRecord, extract_data};
    use crate::TransportError;

    fn decoder() -> SseDecoder {
        SseDecoder::new(1024)
    }

    #[test]
    fn records_split_across_chunks() {
        let mut dec = decoder();
        dec.extend(b"data: {\"type\":\"in").unwrap();
        assert!(dec.next_record().is_none());
        dec.extend(b"it\",\"data\":{}}\n").unwrap();
        assert!(dec.next_record().is_none());
        dec.extend(b"\ndata: {\"type\":\"progress\"}\r\n\r\n").unwrap();

        let Some(SseRecord::Envelope(first)) = dec.next_record() else {
            panic!("expected envelope");
        };
        assert_eq!(first.kind(), "init");
        let Some(SseRecord::Envelope(second)) = dec.next_record() else {
            panic!("expected envelope");
        };
        assert_eq!(second.kind(), "progress");
        assert!(dec.next_record().is_none());
    }

    #[test]
    fn multi_line_data_is_joined() {
        let data = extract_data("event: x\ndata: {\"a\":\ndata:1}\n").unwrap();
        assert_eq!(data, "{\"a\":\n1}");
        assert!(extract_data(": keep-alive").is_none());
    }

    #[test]
    fn object_without_type_is_final_payload() {
        let mut dec = decoder();
        dec.extend(b"data: {\"interpretation\":\"ok\"}\n\n").unwrap();
        let Some(SseRecord::FinalPayload(payload)) = dec.next_record() else {
            panic!("expected final payload");
        };
        assert_eq!(payload.interpretation.as_deref(), Some("ok"));
    }

    #[test]
    fn final_payload_survives_a_bad_visualization() {
        let mut dec = decoder();
        dec.extend(
            br#"data: {"interpretation":"Rain","result":[1],"visualization":{"type":"bar","title":7}}"#,
        )
        .unwrap();
        dec.extend(b"\n\n").unwrap();
        let Some(SseRecord::FinalPayload(payload)) = dec.next_record() else {
            panic!("expected final payload");
        };
        assert_eq!(payload.interpretation.as_deref(), Some("Rain"));
        assert_eq!(payload.result, Some(serde_json::json!([1])));
        assert_eq!(payload.visualization, None);
    }

    #[test]
    fn invalid_utf8_only_drops_its_record() {
        let mut dec = decoder();
        dec.extend(b"data: \xff\xfe\n\ndata: [DONE]\n\n").unwrap();
        assert!(matches!(dec.next_record(), Some(SseRecord::Malformed(_))));
        assert!(matches!(dec.next_record(), Some(SseRecord::Done)));
    }

    #[test]
    fn numeric_type_is_malformed() {
        let mut dec = decoder();
        dec.extend(b"data: {\"type\":7}\n\n").unwrap();
        assert!(matches!(dec.next_record(), Some(SseRecord::Malformed(_))));
    }

    #[test]
    fn trailing_record_without_blank_line() {
        let mut dec = decoder();
        dec.extend(b"data: {\"type\":\"complete\",\"data\":{}}").unwrap();
        assert!(dec.next_record().is_none());
        assert!(matches!(dec.finish(), Some(SseRecord::Envelope(_))));
        assert!(dec.finish().is_none());
    }

    #[test]
    fn oversized_record_overflows() {
        let mut dec = SseDecoder::new(16);
        let err = dec.extend(&[b'x'; 32]).unwrap_err();
        assert_eq!(err, TransportError::BufferOverflow { limit_bytes: 16 });
    }
}
