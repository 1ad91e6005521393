//! Server-Sent Events wire codec, shared by the SSE and Streamable HTTP
//! transports.
//!
//! Events are fields separated by newlines and terminated by a blank line:
//!
//! ```text
//! id: 7
//! event: message
//! data: {"jsonrpc":"2.0",...}
//!
//! ```
//!
//! Within one stream, `id` increases monotonically; the parser tracks the
//! last id seen so a consumer can resume with `Last-Event-ID`.

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event id, when the stream supports resumption
    pub id: Option<String>,
    /// Event type; consumers treat absence as `message`
    pub event: Option<String>,
    /// Event payload (joined with `\n` when multiline)
    pub data: String,
}

impl SseEvent {
    /// A `message` event without an id.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
        }
    }

    /// A `message` event with a resumption id.
    pub fn with_id(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            event: None,
            data: data.into(),
        }
    }

    /// A typed event (`endpoint`, `message`, ...).
    pub fn typed(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: Some(event.into()),
            data: data.into(),
        }
    }

    /// Effective event type.
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }

    /// Encode to wire format, terminated by the blank line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Incremental SSE parser.
///
/// Feed it chunks as they arrive; it emits complete events and remembers the
/// last event id across events and feeds.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
    last_event_id: Option<String>,
}

impl SseParser {
    /// Fresh parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning any events completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        // Non-UTF8 chunks cannot occur in a conforming stream; skip them.
        let Ok(text) = std::str::from_utf8(chunk) else {
            return Vec::new();
        };
        self.buffer.push_str(text);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if let Some(event) = self.flush() {
                    events.push(event);
                }
            } else if let Some(rest) = line.strip_prefix(':') {
                let _ = rest; // comment (keepalive), ignored
            } else {
                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                    None => (line, ""),
                };
                match field {
                    "id" => self.id = Some(value.to_string()),
                    "event" => self.event = Some(value.to_string()),
                    "data" => self.data.push(value.to_string()),
                    _ => {}
                }
            }
        }
        events
    }

    /// The id of the most recently completed event carrying one.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.id = None;
            self.event = None;
            return None;
        }
        let event = SseEvent {
            id: self.id.take(),
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        };
        if let Some(id) = &event.id {
            self.last_event_id = Some(id.clone());
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_minimal() {
        assert_eq!(SseEvent::message("hello").encode(), "data: hello\n\n");
    }

    #[test]
    fn encode_with_id_and_type() {
        let event = SseEvent {
            id: Some("3".into()),
            event: Some("endpoint".into()),
            data: "/message?sessionId=x".into(),
        };
        assert_eq!(
            event.encode(),
            "id: 3\nevent: endpoint\ndata: /message?sessionId=x\n\n"
        );
    }

    #[test]
    fn parse_single_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"id: 1\ndata: payload\n\n");
        assert_eq!(events, vec![SseEvent::with_id("1", "payload")]);
        assert_eq!(parser.last_event_id(), Some("1"));
    }

    #[test]
    fn parse_across_chunk_boundaries() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"id: 9\nda").is_empty());
        assert!(parser.feed(b"ta: part").is_empty());
        let events = parser.feed(b"ial\n\n");
        assert_eq!(events, vec![SseEvent::with_id("9", "partial")]);
    }

    #[test]
    fn multiline_data_joins_with_newline() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: a\ndata: b\n\n");
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn comments_and_dataless_blocks_are_skipped() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keepalive\n\nid: 4\n\ndata: real\n\n");
        assert_eq!(events, vec![SseEvent::message("real")]);
    }

    #[test]
    fn last_event_id_persists_across_events() {
        let mut parser = SseParser::new();
        parser.feed(b"id: 5\ndata: a\n\ndata: b\n\n");
        assert_eq!(parser.last_event_id(), Some("5"));
    }

    #[test]
    fn round_trip() {
        let event = SseEvent::with_id("42", "line1\nline2");
        let mut parser = SseParser::new();
        let events = parser.feed(event.encode().as_bytes());
        assert_eq!(events, vec![event]);
    }
}
