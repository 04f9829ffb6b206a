use bytes::{Buf, BytesMut};

/// Event type assumed when a frame carries no `event:` field
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// SSE Event structure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// Event ID (optional)
    pub id: Option<String>,
    /// Event type/name (optional)
    pub event: Option<String>,
    /// Event data (required)
    pub data: String,
    /// Retry timeout in milliseconds (optional)
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Create a simple data event
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
            retry: None,
        }
    }

    /// Create a named event
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: Some(event.into()),
            data: data.into(),
            retry: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry = Some(retry_ms);
        self
    }

    /// The type listeners are keyed on.
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or(DEFAULT_EVENT_TYPE)
    }

    /// Format as SSE wire format
    pub fn format(&self) -> String {
        let mut output = String::with_capacity(self.data.len() + 50);

        if let Some(ref id) = self.id {
            output.push_str("id: ");
            output.push_str(id);
            output.push('\n');
        }

        if let Some(ref event) = self.event {
            output.push_str("event: ");
            output.push_str(event);
            output.push('\n');
        }

        if let Some(retry) = self.retry {
            output.push_str("retry: ");
            output.push_str(&retry.to_string());
            output.push('\n');
        }

        // one `data:` line per line of data; the decoder joins them with LF
        for line in self.data.split("\r\n").flat_map(|part| part.split(['\r', '\n'])) {
            output.push_str("data: ");
            output.push_str(line);
            output.push('\n');
        }

        output.push('\n'); // End of event
        output
    }

    /// Create a comment frame (for keepalive)
    pub fn comment(text: &str) -> String {
        format!(": {}\n\n", text)
    }
}

/// Incremental `text/event-stream` decoder.
///
/// Chunks may split lines, fields or even a CRLF pair anywhere; decoded
/// events come out only once their terminating blank line has arrived.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    /// A chunk ended on CR; a LF opening the next chunk belongs to it
    skip_lf: bool,
    event: Option<String>,
    data: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest `retry:` value seen on this stream.
    pub fn retry(&self) -> Option<u64> {
        self.retry
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feed a chunk, returning every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        loop {
            if self.skip_lf && !self.buffer.is_empty() {
                if self.buffer[0] == b'\n' {
                    self.buffer.advance(1);
                }
                self.skip_lf = false;
            }
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r') else {
                break;
            };
            let line = self.buffer.split_to(pos);
            let terminator = self.buffer[0];
            self.buffer.advance(1);
            if terminator == b'\r' {
                self.skip_lf = true;
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    self.retry = value.parse().ok();
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseEvent {
            id: self.last_event_id.clone(),
            event,
            data: std::mem::take(&mut self.data),
            retry: self.retry,
        })
    }
}

/// Channel name carried by a stream URL (`...?channel=rover` → `rover`).
///
/// URLs without a channel parameter belong to the reserved `sse` channel.
pub fn parse_channel(url: &str) -> String {
    let mut splits = url.rsplit('=');
    match (splits.next(), splits.next()) {
        (Some(last), Some(_)) => percent_encoding::percent_decode_str(last)
            .decode_utf8_lossy()
            .into_owned(),
        _ => "sse".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_named_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: heart").is_empty());
        assert!(decoder.feed(b"beat\ndata: {\"timestamp\":").is_empty());
        let events = decoder.feed(b" \"2024-01-01T00:00:00Z\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "heartbeat");
        assert_eq!(events[0].data, "{\"timestamp\": \"2024-01-01T00:00:00Z\"}");
    }

    #[test]
    fn joins_multiline_data_and_defaults_type() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: one\ndata: two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), DEFAULT_EVENT_TYPE);
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[test]
    fn handles_crlf_split_between_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: x\r").is_empty());
        assert!(decoder.feed(b"\n\r").len() == 1);
        // the trailing LF of the second CRLF must not count as another blank line
        assert!(decoder.feed(b"\ndata: y\r\n\r\n").len() == 1);
    }

    #[test]
    fn comments_and_empty_frames_are_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b": keepalive\n\n").is_empty());
        assert!(decoder.feed(b"event: lonely\n\n").is_empty());
        // the event type from the dataless frame does not leak forward
        let events = decoder.feed(b"data: z\n\n");
        assert_eq!(events[0].event_type(), DEFAULT_EVENT_TYPE);
    }

    #[test]
    fn tracks_retry_and_id() {
        let mut decoder = SseDecoder::new();
        decoder.feed(b"retry: 1500\n\n");
        assert_eq!(decoder.retry(), Some(1500));
        decoder.feed(b"retry: soon\n\n");
        assert_eq!(decoder.retry(), Some(1500));
        let events = decoder.feed(b"id: 7\ndata: a\n\n");
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(decoder.last_event_id(), Some("7"));
    }

    #[test]
    fn format_is_decodable() {
        let event = SseEvent::named("condition", "line1\nline2").with_id("9").with_retry(2000);
        let mut decoder = SseDecoder::new();
        let decoded = decoder.feed(event.format().as_bytes());
        assert_eq!(decoded, vec![event]);
        assert_eq!(SseEvent::comment("keepalive"), ": keepalive\n\n");
    }

    #[test]
    fn format_keeps_blank_and_trailing_lines() {
        for data in ["", "a\n", "\n\nb", "x\n\n"] {
            let event = SseEvent::data(data);
            let decoded = SseDecoder::new().feed(event.format().as_bytes());
            assert_eq!(decoded, vec![event]);
        }
    }

    #[test]
    fn carriage_returns_in_data_become_line_feeds() {
        let event = SseEvent::named("note", "a\rb\r\nc");
        assert_eq!(event.format(), "event: note\ndata: a\ndata: b\ndata: c\n\n");
        let decoded = SseDecoder::new().feed(event.format().as_bytes());
        assert_eq!(decoded[0].data, "a\nb\nc");
    }

    #[test]
    fn channel_from_url() {
        assert_eq!(parse_channel("/sse/stream?channel=rover"), "rover");
        assert_eq!(parse_channel("http://h/sse/stream?channel=a%20b"), "a b");
        assert_eq!(parse_channel("/sse/stream"), "sse");
    }
}
