//! Incremental decoding of a streamed body into events.
//!
//! Three layers, each usable on its own:
//! - [`Utf8Decoder`] turns byte chunks into text, carrying a multi-byte
//!   sequence that straddles a chunk boundary into the next call.
//! - [`LineBuffer`] splits text on `\n` and keeps the unterminated tail.
//! - [`EventDecoder`] picks the `data:` lines and deserializes their payload.

use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::event::StreamEvent;

/// Prefix marking a line that carries an event payload.
///
/// The space that usually follows (`data: {..}`) is optional, as in SSE
/// framing; surrounding whitespace is trimmed from the payload either way.
pub const RECORD_MARKER: &str = "data:";

/// Stateful UTF-8 decoder.
///
/// Invalid sequences are replaced with U+FFFD. An incomplete sequence at the
/// end of a chunk is held back until the next chunk completes it.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a new decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let input = if self.carry.is_empty() {
            chunk.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(chunk);
            joined
        };

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            // Truncated sequence: wait for the next chunk.
                            self.carry.extend_from_slice(tail);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush bytes still held back. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.carry.is_empty() {
            return String::new();
        }
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }

    /// Number of bytes waiting for the rest of their sequence.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }
}

/// Accumulates decoded text and yields complete lines.
///
/// After every [`push`](Self::push) the buffer holds only the text after the
/// last newline seen so far.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every line it completed, in order.
    ///
    /// Lines are returned without their `\n`.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let Some(last_newline) = self.pending.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, tail);
        complete[..last_newline]
            .split('\n')
            .map(str::to_owned)
            .collect()
    }

    /// The unterminated tail.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Take the unterminated tail, if non-empty.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Returns the payload of a `data:` line, trimmed, or `None` for any other line.
pub fn record_payload(line: &str) -> Option<&str> {
    line.strip_prefix(RECORD_MARKER).map(str::trim)
}

/// Byte-to-event decoder for one stream.
///
/// Malformed payloads are skipped and counted; they never stop decoding.
#[derive(Debug)]
pub struct EventDecoder<T> {
    utf8: Utf8Decoder,
    lines: LineBuffer,
    next_sequence: u64,
    skipped: u64,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Default for EventDecoder<T> {
    fn default() -> Self {
        Self {
            utf8: Utf8Decoder::new(),
            lines: LineBuffer::new(),
            next_sequence: 0,
            skipped: 0,
            _payload: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> EventDecoder<T> {
    /// Create a new decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes and return the events it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent<T>> {
        let text = self.utf8.decode(chunk);
        let lines = self.lines.push(&text);
        lines.iter().filter_map(|l| self.decode_line(l)).collect()
    }

    /// Flush at end of body.
    ///
    /// A final `data:` line that arrived without a trailing newline is still
    /// decoded.
    pub fn finish(&mut self) -> Vec<StreamEvent<T>> {
        let text = self.utf8.finish();
        let mut events: Vec<_> = self
            .lines
            .push(&text)
            .iter()
            .filter_map(|l| self.decode_line(l))
            .collect();
        if let Some(last) = self.lines.take_remainder() {
            events.extend(self.decode_line(&last));
        }
        events
    }

    /// Text received but not yet terminated by a newline.
    pub fn pending(&self) -> &str {
        self.lines.pending()
    }

    /// Number of `data:` lines dropped because their payload did not parse.
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Number of events produced so far.
    pub const fn decoded(&self) -> u64 {
        self.next_sequence
    }

    fn decode_line(&mut self, line: &str) -> Option<StreamEvent<T>> {
        let payload = record_payload(line)?;
        if payload.is_empty() {
            return None;
        }
        match serde_json::from_str::<T>(payload) {
            Ok(payload) => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                Some(StreamEvent { sequence, payload })
            }
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, len = payload.len(), "skipping malformed stream record");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn utf8_split_multibyte_across_chunks() {
        let bytes = "héllo €".as_bytes();
        // Split inside the 3-byte euro sign.
        let cut = bytes.len() - 1;
        let mut d = Utf8Decoder::new();
        let first = d.decode(&bytes[..cut]);
        assert_eq!(first, "héllo ");
        assert_eq!(d.pending_bytes(), 2);
        let second = d.decode(&bytes[cut..]);
        assert_eq!(second, "€");
        assert_eq!(d.pending_bytes(), 0);
    }

    #[test]
    fn utf8_one_byte_at_a_time() {
        let text = "日本語 ✓ ok";
        let mut d = Utf8Decoder::new();
        let mut out = String::new();
        for b in text.as_bytes() {
            out.push_str(&d.decode(std::slice::from_ref(b)));
        }
        out.push_str(&d.finish());
        assert_eq!(out, text);
    }

    #[test]
    fn utf8_invalid_bytes_are_replaced() {
        let mut d = Utf8Decoder::new();
        let out = d.decode(b"a\xffb");
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn utf8_dangling_sequence_flushes_as_replacement() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(b"ok\xe2\x82"), "ok");
        assert_eq!(d.finish(), "\u{FFFD}");
        assert_eq!(d.finish(), "");
    }

    #[test]
    fn line_buffer_keeps_tail() {
        let mut buf = LineBuffer::new();
        assert!(buf.push("abc").is_empty());
        assert_eq!(buf.pending(), "abc");
        assert_eq!(buf.push("def\nxy"), vec!["abcdef".to_string()]);
        assert_eq!(buf.pending(), "xy");
        assert_eq!(
            buf.push("\n\nz\n"),
            vec!["xy".to_string(), String::new(), "z".to_string()]
        );
        assert_eq!(buf.pending(), "");
        assert_eq!(buf.take_remainder(), None);
    }

    #[test]
    fn record_payload_matches_marker_only() {
        assert_eq!(record_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(record_payload("data:{\"a\":1}\r"), Some("{\"a\":1}"));
        assert_eq!(record_payload(": heartbeat"), None);
        assert_eq!(record_payload("event: feed"), None);
        assert_eq!(record_payload(" data: x"), None);
    }

    #[test]
    fn space_after_marker_is_optional() {
        let mut d = EventDecoder::<Value>::new();
        let events = d.push(b"data:{\"x\":1}\ndata: {\"x\":2}\ndata:  {\"x\":3}\n");
        let got: Vec<_> = events.into_iter().map(|e| e.payload).collect();
        assert_eq!(got, vec![json!({"x": 1}), json!({"x": 2}), json!({"x": 3})]);
    }

    #[test]
    fn partial_line_is_retained() {
        let mut d = EventDecoder::<Value>::new();
        let events = d.push(b"data: {\"a\":1}\ndata: {\"a\":");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, json!({"a": 1}));
        assert_eq!(d.pending(), "data: {\"a\":");

        let events = d.push(b"2}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, json!({"a": 2}));
        assert_eq!(events[0].sequence, 1);
    }

    #[test]
    fn malformed_record_is_skipped() {
        let mut d = EventDecoder::<Value>::new();
        let events = d.push(b"data: {not valid json\ndata: {\"ok\":true}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, json!({"ok": true}));
        assert_eq!(events[0].sequence, 0);
        assert_eq!(d.skipped(), 1);
    }

    #[test]
    fn non_marker_lines_are_ignored() {
        let mut d = EventDecoder::<Value>::new();
        let events = d.push(
            b": keep-alive\nevent: feed\nid: 7\ndata: {\"n\":1}\n\nretry: 100\ndata:\ndata: {\"n\":2}\r\n",
        );
        let got: Vec<_> = events.into_iter().map(|e| e.payload).collect();
        assert_eq!(got, vec![json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(d.skipped(), 0);
    }

    #[test]
    fn line_split_mid_character() {
        let line = "data: {\"message\":\"crawl ✓ done\"}\n".as_bytes();
        let tick = line.iter().position(|&b| b == 0xE2).unwrap();
        let mut d = EventDecoder::<Value>::new();
        assert!(d.push(&line[..=tick]).is_empty());
        assert!(d.push(&line[tick + 1..tick + 2]).is_empty());
        let events = d.push(&line[tick + 2..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, json!({"message": "crawl ✓ done"}));
    }

    #[test]
    fn finish_decodes_unterminated_last_line() {
        let mut d = EventDecoder::<Value>::new();
        assert!(d.push(b"data: {\"last\":true}").is_empty());
        let events = d.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, json!({"last": true}));
        assert!(d.finish().is_empty());
    }

    #[test]
    fn typed_payload_mismatch_counts_as_skipped() {
        #[derive(serde::Deserialize)]
        struct Progress {
            #[expect(dead_code)]
            percent: u8,
        }

        let mut d = EventDecoder::<Progress>::new();
        let events = d.push(b"data: {\"percent\":\"half\"}\ndata: {\"percent\":50}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(d.skipped(), 1);
        assert_eq!(d.decoded(), 1);
    }
}
