use std::mem;

/// A parsed SSE event from a streaming chat-completions response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped.
    Data(String),
    /// The `data: [DONE]` termination signal.
    Done,
}

/// Line-buffering SSE parser.
///
/// TCP chunks do not align with SSE event boundaries: one chunk may carry
/// several `data:` lines, and a JSON payload may be split across two chunks.
/// Bytes are accumulated until a full line (terminated by `\n`) is available,
/// so every complete event is emitted exactly once and partial payloads are
/// never handed to the JSON parser.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk, returning every complete event it finished.
    ///
    /// A trailing partial line stays buffered for the next `feed` call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line = self.buffer[..newline].trim_end_matches('\r').to_owned();
            self.buffer.drain(..=newline);
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final unterminated line once the byte stream has ended.
    pub fn flush(&mut self) -> Option<SseEvent> {
        let remaining = mem::take(&mut self.buffer);
        parse_line(&remaining)
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed == "data: [DONE]" {
        return Some(SseEvent::Done);
    }
    // Non-data SSE fields (event:, id:, retry:, comments) are ignored.
    let data = trimmed.strip_prefix("data: ")?;
    if data.trim().is_empty() {
        None
    } else {
        Some(SseEvent::Data(data.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut buf = SseLineBuffer::new();
        let events = buf.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".into()),
                SseEvent::Data("{\"b\":2}".into()),
            ]
        );
    }

    #[test]
    fn test_payload_split_across_chunks() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.feed(b"data: {\"content\":").is_empty());
        let events = buf.feed(b"\"hi\"}\n");
        assert_eq!(events, vec![SseEvent::Data("{\"content\":\"hi\"}".into())]);
    }

    #[test]
    fn test_done_signal() {
        let mut buf = SseLineBuffer::new();
        let events = buf.feed(b"data: [DONE]\n\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn test_ignores_non_data_fields() {
        let mut buf = SseLineBuffer::new();
        let events = buf.feed(b"event: ping\nid: 7\n: comment\ndata: x\n");
        assert_eq!(events, vec![SseEvent::Data("x".into())]);
    }

    #[test]
    fn test_flush_recovers_unterminated_line() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.feed(b"data: tail").is_empty());
        assert_eq!(buf.flush(), Some(SseEvent::Data("tail".into())));
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn test_crlf_lines() {
        let mut buf = SseLineBuffer::new();
        let events = buf.feed(b"data: one\r\n\r\ndata: [DONE]\r\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("one".into()), SseEvent::Done]
        );
    }
}
