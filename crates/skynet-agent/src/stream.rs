//! Server-Sent Events line framing shared by every upstream adapter.
//!
//! Upstream responses arrive as raw byte chunks over HTTP; a single `data:`
//! line may be split across two chunks. `SseLineBuffer` accumulates bytes and
//! yields only complete, trimmed, non-blank lines, carrying any trailing
//! partial line forward to the next push.

/// One parsed SSE line: either an `event: <name>` or a `data: <payload>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Accepts both `data:foo` and `data: foo` (and the `event:` equivalent) —
/// upstream providers are inconsistent about the space after the colon.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(rest) = line.strip_prefix("event:") {
        return Some(SseParsed::Event(rest.trim().to_string()));
    }
    if let Some(rest) = line.strip_prefix("data:") {
        return Some(SseParsed::Data(rest.trim().to_string()));
    }
    None
}

/// Buffers raw bytes from a streaming HTTP body into complete lines.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    carry: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw chunk and return the complete lines it produced (trimmed,
    /// blank lines dropped). Any trailing incomplete line is retained for the
    /// next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let Ok(text) = std::str::from_utf8(chunk) else {
            return Vec::new();
        };
        self.carry.push_str(text);
        let mut lines: Vec<&str> = self.carry.split('\n').collect();
        let remainder = lines.pop().unwrap_or("").to_string();
        let complete = lines
            .into_iter()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        self.carry = remainder;
        complete
    }
}

/// A single event blob accumulated across a blank-line-terminated SSE block
/// (an `event:` line plus one or more `data:` lines). Used by adapters that
/// speak full SSE block framing (the custom agent handler) rather than
/// single-line `data:` framing (the LLM-family providers).
#[derive(Debug, Default, Clone)]
pub struct SseBlock {
    pub event: Option<String>,
    pub data: String,
}

/// Accumulates raw bytes into blank-line-terminated SSE blocks.
#[derive(Debug, Default)]
pub struct SseBlockBuffer {
    carry: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseBlockBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a raw chunk; returns every block completed by a blank line within
    /// this chunk. A block spanning a chunk boundary stays pending.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseBlock> {
        let Ok(text) = std::str::from_utf8(chunk) else {
            return Vec::new();
        };
        self.carry.push_str(text);
        let mut lines: Vec<&str> = self.carry.split('\n').collect();
        let remainder = lines.pop().unwrap_or("").to_string();

        let mut out = Vec::new();
        for raw_line in lines {
            let line = raw_line.trim_end_matches('\r');
            if line.trim().is_empty() {
                if self.pending_event.is_some() || !self.pending_data.is_empty() {
                    out.push(SseBlock {
                        event: self.pending_event.take(),
                        data: self.pending_data.join("\n"),
                    });
                    self.pending_data.clear();
                }
                continue;
            }
            match parse_sse_line(line) {
                Some(SseParsed::Event(name)) => self.pending_event = Some(name),
                Some(SseParsed::Data(data)) => self.pending_data.push(data),
                None => {}
            }
        }
        self.carry = remainder;
        out
    }
}

/// A parsed, provider-agnostic streaming signal emitted while consuming an
/// LLM-family upstream response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta { text: String },
    Done,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_space() {
        assert_eq!(
            parse_sse_line("data:{\"a\":1}"),
            Some(SseParsed::Data("{\"a\":1}".to_string()))
        );
        assert_eq!(
            parse_sse_line("data: {\"a\":1}"),
            Some(SseParsed::Data("{\"a\":1}".to_string()))
        );
        assert_eq!(
            parse_sse_line("event:message"),
            Some(SseParsed::Event("message".to_string()))
        );
    }

    #[test]
    fn line_buffer_carries_partial_line_across_pushes() {
        let mut buf = SseLineBuffer::new();
        let first = buf.push(b"data: hel");
        assert!(first.is_empty());
        let second = buf.push(b"lo\ndata: done\n");
        assert_eq!(
            second,
            vec!["data: hello".to_string(), "data: done".to_string()]
        );
    }

    #[test]
    fn block_buffer_groups_multiline_data_on_blank_line() {
        let mut buf = SseBlockBuffer::new();
        let blocks = buf.push(b"event: message.delta\ndata: part one\ndata: part two\n\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].event.as_deref(), Some("message.delta"));
        assert_eq!(blocks[0].data, "part one\npart two");
    }

    #[test]
    fn block_buffer_handles_split_chunk() {
        let mut buf = SseBlockBuffer::new();
        assert!(buf.push(b"event: message.delta\ndata: hel").is_empty());
        let blocks = buf.push(b"lo\n\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data, "hello");
    }
}
