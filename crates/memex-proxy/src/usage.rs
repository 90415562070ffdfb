//! Token usage capture from provider responses.
//!
//! Anthropic reports `usage.input_tokens`/`usage.output_tokens` (nested under
//! `message` in the streaming `message_start` event, with the final output
//! count in `message_delta`). OpenAI reports
//! `usage.prompt_tokens`/`usage.completion_tokens`, in the last chunk when
//! streaming.

use memex_core::SchemaType;
use serde_json::Value;

/// Non-streaming bodies larger than this are not parsed.
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenUsage {
    /// Apply whatever usage fields `event` carries. Later events win.
    fn merge(&mut self, event: &Value) {
        let usage = event
            .get("usage")
            .or_else(|| event.get("message").and_then(|m| m.get("usage")));
        let Some(usage) = usage else {
            return;
        };

        if let Some(n) = first_count(usage, &["input_tokens", "prompt_tokens"]) {
            self.input_tokens = n;
        }
        if let Some(n) = first_count(usage, &["output_tokens", "completion_tokens"]) {
            self.output_tokens = n;
        }
    }
}

fn first_count(usage: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| usage.get(*k).and_then(Value::as_i64))
}

/// Observes response chunks as they stream past and reports usage at the end.
#[derive(Debug)]
pub struct UsageScanner {
    event_stream: bool,
    buffer: Vec<u8>,
    overflowed: bool,
    usage: TokenUsage,
}

impl UsageScanner {
    /// `None` for schemas whose usage format is unknown.
    pub fn new(schema: SchemaType, content_type: Option<&str>) -> Option<Self> {
        if !schema.is_known() {
            return None;
        }
        let event_stream = content_type.is_some_and(|ct| ct.starts_with("text/event-stream"));
        Some(Self {
            event_stream,
            buffer: Vec::new(),
            overflowed: false,
            usage: TokenUsage::default(),
        })
    }

    pub fn observe(&mut self, chunk: &[u8]) {
        if self.overflowed {
            if self.event_stream {
                // Resynchronise at the next line boundary.
                if let Some(idx) = chunk.iter().position(|&b| b == b'\n') {
                    self.overflowed = false;
                    self.observe(&chunk[idx + 1..]);
                }
            }
            return;
        }

        self.buffer.extend_from_slice(chunk);

        if self.event_stream {
            self.drain_lines();
        }

        if self.buffer.len() > MAX_CAPTURE_BYTES {
            self.buffer = Vec::new();
            self.overflowed = true;
        }
    }

    pub fn finish(mut self) -> TokenUsage {
        if self.overflowed {
            return if self.event_stream {
                self.usage
            } else {
                TokenUsage::default()
            };
        }

        if self.event_stream {
            let rest = std::mem::take(&mut self.buffer);
            self.scan_line(&rest);
        } else if let Ok(body) = serde_json::from_slice::<Value>(&self.buffer) {
            self.usage.merge(&body);
        }
        self.usage
    }

    fn drain_lines(&mut self) {
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = self.buffer[start..end].to_vec();
            self.scan_line(&line);
            start = end + 1;
        }
        self.buffer.drain(..start);
    }

    fn scan_line(&mut self, line: &[u8]) {
        let Ok(line) = std::str::from_utf8(line) else {
            return;
        };
        let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        if let Ok(event) = serde_json::from_str::<Value>(data) {
            self.usage.merge(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(schema: SchemaType, content_type: &str, chunks: &[&[u8]]) -> TokenUsage {
        let mut scanner = UsageScanner::new(schema, Some(content_type)).unwrap();
        for chunk in chunks {
            scanner.observe(chunk);
        }
        scanner.finish()
    }

    #[test]
    fn test_unknown_schema_is_not_scanned() {
        assert!(UsageScanner::new(SchemaType::Unknown, Some("application/json")).is_none());
    }

    #[test]
    fn test_anthropic_json_body() {
        let body = br#"{"id":"msg_1","type":"message","usage":{"input_tokens":12,"output_tokens":34}}"#;
        let usage = scan(SchemaType::Anthropic, "application/json", &[&body[..10], &body[10..]]);
        assert_eq!(usage, TokenUsage { input_tokens: 12, output_tokens: 34 });
    }

    #[test]
    fn test_openai_json_body() {
        let body = br#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":7,"total_tokens":12}}"#;
        let usage = scan(SchemaType::OpenAI, "application/json", &[&body[..]]);
        assert_eq!(usage, TokenUsage { input_tokens: 5, output_tokens: 7 });
    }

    #[test]
    fn test_anthropic_event_stream_split_across_chunks() {
        let events: &[&[u8]] = &[
            b"event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n\n",
            b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"Hi\"}}\n\n",
            b"event: message_delta\ndata: {\"type\":\"message_delta\",\"usage\":{\"output_",
            b"tokens\":15}}\n\n",
            b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ];
        let usage = scan(SchemaType::Anthropic, "text/event-stream; charset=utf-8", events);
        assert_eq!(usage, TokenUsage { input_tokens: 25, output_tokens: 15 });
    }

    #[test]
    fn test_openai_event_stream_with_done_marker() {
        let events: &[&[u8]] = &[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\r\n\r\n",
            b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":9,\"completion_tokens\":3}}\r\n\r\n",
            b"data: [DONE]\r\n\r\n",
        ];
        let usage = scan(SchemaType::OpenAI, "text/event-stream", events);
        assert_eq!(usage, TokenUsage { input_tokens: 9, output_tokens: 3 });
    }

    #[test]
    fn test_oversized_json_body_reports_zero() {
        let mut scanner = UsageScanner::new(SchemaType::OpenAI, Some("application/json")).unwrap();
        scanner.observe(br#"{"usage":{"prompt_tokens":5,"completion_tokens":7},"pad":""#);
        scanner.observe(&vec![b'x'; MAX_CAPTURE_BYTES]);
        scanner.observe(br#""}"#);
        assert_eq!(scanner.finish(), TokenUsage::default());
    }

    #[test]
    fn test_malformed_body_reports_zero() {
        let usage = scan(SchemaType::Anthropic, "application/json", &[&b"not json"[..]]);
        assert_eq!(usage, TokenUsage::default());
    }
}
