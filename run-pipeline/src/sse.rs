//! Incremental `text/event-stream` decoder.
//!
//! Only `data:` fields matter to the pipeline. `event:`, `id:` and `retry:`
//! are accepted and ignored; reconnection is owned by the session state
//! machine, not by the server's retry hint.

/// Sentinel payload that ends a trace stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns the data payloads of completed events.
    ///
    /// Chunks may split lines (or UTF-8 sequences) anywhere.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(payload) = self.process_line(&line) {
                events.push(payload);
            }
        }

        events
    }

    /// Flush a trailing event when the connection closes without a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(payload) = self.process_line(&line) {
                return Some(payload);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        assert!(decoder.push(b"1}\r").is_empty());
        let events = decoder.push(b"\n\ndata: [DONE]\n\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string(), DONE_SENTINEL.to_string()]);
    }

    #[test]
    fn test_ignores_comments_and_other_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keepalive\nevent: trace\nid: 9\nretry: 100\ndata: x\n\n");
        assert_eq!(events, vec!["x".to_string()]);
        assert!(decoder.push(b"event: ping\n\n").is_empty());
    }

    #[test]
    fn test_joins_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: line one\ndata:line two\n\n");
        assert_eq!(events, vec!["line one\nline two".to_string()]);
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_multibyte_split() {
        let mut decoder = SseDecoder::new();
        let text = "data: héllo\n\n".as_bytes();
        let (left, right) = text.split_at(8);
        assert!(decoder.push(left).is_empty());
        assert_eq!(decoder.push(right), vec!["héllo".to_string()]);
    }
}
