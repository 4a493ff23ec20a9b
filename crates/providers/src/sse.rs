//! Incremental SSE (Server-Sent Events) decoder for chat-completion streams.
//!
//! Events are separated by a blank line; each carries optional `event:` lines and one
//! or more `data:` lines. Bytes are buffered raw so a multi-byte character split
//! across two network chunks is decoded once it is complete.

/// Sentinel payload OpenAI-compatible servers send after the last delta.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A single parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }
}

#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the HTTP body. Returns every event completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, sep_len)) = find_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

/// Position and length of the first blank-line separator (`\n\n` or `\r\n\r\n`).
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(val) = line.strip_prefix("event:") {
            event = Some(val.trim().to_string());
        } else if let Some(val) = line.strip_prefix("data:") {
            data_lines.push(val.strip_prefix(' ').unwrap_or(val));
        }
        // id:, retry: and ":" comments carry nothing we use
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_events_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert!(events[1].is_done());
    }

    #[test]
    fn test_crlf_separators_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keep-alive\r\n\r\nevent: delta\r\ndata: hi\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("delta"));
        assert_eq!(events[0].data, "hi");
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut parser = SseParser::new();
        let bytes = "data: zażółć\n\n".as_bytes();
        // split inside the two-byte 'ż'
        let split = 9;
        assert!(parser.feed(&bytes[..split]).is_empty());
        let events = parser.feed(&bytes[split..]);
        assert_eq!(events[0].data, "zażółć");
    }
}
