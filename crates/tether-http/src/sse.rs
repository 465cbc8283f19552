//! Incremental Server-Sent Events parser.

use serde_json::Value;

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the stream omits it
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
    /// Last event id, if supplied
    pub id: Option<String>,
}

impl SseEvent {
    /// Parses the data as JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.data).ok()
    }
}

/// Accumulates chunks and yields complete events.
///
/// Accepts `\n` and `\r\n` line endings, skips comment lines and discards
/// events without data. Chunks are buffered as bytes and only complete lines
/// are decoded, so a multi-byte character split across chunks survives.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    /// Create an empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            // '\n' never occurs inside a multi-byte sequence
            let raw = String::from_utf8_lossy(&raw);
            let line = raw.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_events_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: endpoint\nda").is_empty());
        let events = parser.push(b"ta: /messages?sid=1\n\nevent: message\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".into(),
                data: "/messages?sid=1".into(),
                id: None
            }]
        );
        let events = parser.push(b"data: {\"id\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].json().unwrap()["id"], 1);
    }

    #[test]
    fn test_crlf_comments_and_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keep-alive\r\n\r\nid: 7\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "message".into(),
                data: "a\nb".into(),
                id: Some("7".into())
            }]
        );
    }

    #[test]
    fn test_event_without_data_is_discarded() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: ping\n\n").is_empty());
        // The discarded event type must not leak into the next event.
        let events = parser.push(b"data: x\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let frame = "data: {\"text\":\"café 🦀\"}\n\n".as_bytes();
        // Split inside 'é' (0xC3 0xA9) and again inside the crab
        let e_acute = frame.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let crab = frame.iter().position(|&b| b == 0xF0).unwrap() + 2;

        let mut parser = SseParser::new();
        assert!(parser.push(&frame[..e_acute]).is_empty());
        assert!(parser.push(&frame[e_acute..crab]).is_empty());
        let events = parser.push(&frame[crab..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].json().unwrap()["text"], "café 🦀");
    }
}
