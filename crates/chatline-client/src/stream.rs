//! Streaming event types and the incremental body decoder
//!
//! The chat endpoint answers with a chunked body of `data: {json}` lines.
//! Chunk boundaries fall anywhere, including inside a UTF-8 sequence or in the
//! middle of a JSON payload, so decoding happens in three layers: bytes to
//! text ([`Utf8Decoder`]), text to complete lines ([`LineBuffer`]), and lines
//! to events ([`parse_event_line`]). [`EventDecoder`] stacks them and
//! [`consume`] drives the read loop.

use async_stream::stream;
use futures::StreamExt;
use serde::Deserialize;
use std::fmt::Display;
use std::pin::Pin;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

/// Prefix of an event line. One space after the colon is optional.
pub const DATA_PREFIX: &str = "data:";

/// Failure reason synthesized when the body ends without `done` or `error`
pub const TRUNCATED_STREAM_MESSAGE: &str = "Stream ended before completion";

/// Events emitted while consuming a chat stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text fragment to append to the in-progress message
    Append { content: String },
    /// The response finished normally
    Complete,
    /// The response failed; no further events follow
    Fail { message: String },
}

impl StreamEvent {
    /// Check if this is a terminal event (Complete or Fail)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete | StreamEvent::Fail { .. })
    }
}

/// A stream of chat events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Incremental UTF-8 decoder that carries incomplete sequences between reads.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, holding back a trailing incomplete sequence.
    /// Invalid bytes become U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            let err = match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => err,
            };

            let valid = err.valid_up_to();
            out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());

            match err.error_len() {
                Some(len) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                None => {
                    // Incomplete sequence at the end; wait for more bytes
                    self.pending.drain(..valid);
                    return out;
                }
            }
        }
    }

    /// Flush at end of input. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

/// Rolling text buffer that hands out complete lines only.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every line whose `\n` has now been seen.
    /// A trailing `\r` is stripped. The unterminated tail stays buffered.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        // The buffered tail never holds a newline, so only new text is searched
        let Some(offset) = text.rfind('\n') else {
            self.buffer.push_str(text);
            return Vec::new();
        };
        let last_newline = self.buffer.len() + offset;
        self.buffer.push_str(text);

        let tail = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);

        complete[..complete.len() - 1]
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect()
    }

    /// The unterminated fragment currently buffered
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    /// Take the unterminated fragment, leaving the buffer empty
    pub fn take_remainder(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse a single complete line.
///
/// Returns `None` for lines without the data prefix (keep-alives, comments,
/// other SSE fields), for payloads that are not valid JSON, and for payloads
/// that carry none of `content`, `done` or `error`.
pub fn parse_event_line(line: &str) -> Option<StreamEvent> {
    let data = line.strip_prefix(DATA_PREFIX)?;
    let data = data.strip_prefix(' ').unwrap_or(data);

    let payload: EventPayload = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!("Skipping malformed event line: {}", e);
            return None;
        }
    };

    if let Some(message) = payload.error {
        return Some(StreamEvent::Fail { message });
    }
    if payload.done == Some(true) {
        return Some(StreamEvent::Complete);
    }
    payload.content.map(|content| StreamEvent::Append { content })
}

/// Byte-level decoder turning body chunks into events.
///
/// Emits nothing after the first terminal event.
#[derive(Debug, Default)]
pub struct EventDecoder {
    utf8: Utf8Decoder,
    lines: LineBuffer,
    finished: bool,
}

impl EventDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next body chunk
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let text = self.utf8.decode(bytes);
        let mut events = Vec::new();

        for line in self.lines.push(&text) {
            if let Some(event) = parse_event_line(&line) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.finished = true;
                    break;
                }
            }
        }

        events
    }

    /// Signal end of body.
    ///
    /// An unterminated trailing line is dropped unparsed. If no terminal event
    /// was seen, the stream was truncated and a `Fail` is returned.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let _ = self.utf8.finish();
        let partial = self.lines.take_remainder();
        if !partial.is_empty() {
            tracing::debug!("Discarding unterminated line ({} bytes)", partial.len());
        }

        Some(StreamEvent::Fail {
            message: TRUNCATED_STREAM_MESSAGE.to_string(),
        })
    }

    /// Whether a terminal event has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Drive the read loop over a chunked body.
///
/// Reading stops after the first terminal event, on a read error (reported as
/// `Fail`), or when `cancel` fires. In every case the body is dropped, which
/// releases the underlying connection. Cancellation yields no further events.
pub fn consume<S, B, E>(body: S, cancel: CancellationToken) -> StreamEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(stream! {
        let mut body = Box::pin(body);
        let mut decoder = EventDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };

            let Some(chunk) = next else {
                tracing::debug!("Stream cancelled, releasing reader");
                return;
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for event in decoder.feed(bytes.as_ref()) {
                        yield event;
                    }
                    if decoder.is_finished() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    yield StreamEvent::Fail {
                        message: format!("Stream read error: {}", e),
                    };
                    return;
                }
                None => {
                    if let Some(event) = decoder.finish() {
                        tracing::warn!("Stream ended without a completion event");
                        yield event;
                    }
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(text: &str) -> StreamEvent {
        StreamEvent::Append {
            content: text.to_string(),
        }
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = EventDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.feed(chunk));
        }
        events.extend(decoder.finish());
        events
    }

    // --- Utf8Decoder ---

    #[test]
    fn test_utf8_two_byte_split() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"caf\xC3"), "caf");
        assert_eq!(decoder.decode(b"\xA9!"), "é!");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_utf8_four_byte_split_three_ways() {
        // U+1F600 = F0 9F 98 80
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"\xF0"), "");
        assert_eq!(decoder.decode(b"\x9F\x98"), "");
        assert_eq!(decoder.decode(b"\x80"), "\u{1F600}");
    }

    #[test]
    fn test_utf8_invalid_byte_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_utf8_dangling_sequence_on_finish() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"ok\xE2\x82"), "ok");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    // --- LineBuffer ---

    #[test]
    fn test_line_buffer_retains_partial() {
        let mut lines = LineBuffer::new();
        assert!(lines.push("data: {\"con").is_empty());
        assert_eq!(lines.remainder(), "data: {\"con");
        assert_eq!(
            lines.push("tent\":\"x\"}\n\ndata"),
            vec!["data: {\"content\":\"x\"}".to_string(), String::new()]
        );
        assert_eq!(lines.remainder(), "data");
    }

    #[test]
    fn test_line_buffer_strips_crlf() {
        let mut lines = LineBuffer::new();
        assert_eq!(
            lines.push("a\r\nb\r\n"),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(lines.remainder(), "");
    }

    #[test]
    fn test_line_buffer_long_line_in_many_chunks() {
        let mut lines = LineBuffer::new();
        let payload = "x".repeat(64);
        for _ in 0..1000 {
            assert!(lines.push(&payload).is_empty());
        }
        let released = lines.push("\nnext");
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].len(), 64 * 1000);
        assert_eq!(lines.remainder(), "next");
    }

    // --- parse_event_line ---

    #[test]
    fn test_parse_content() {
        assert_eq!(
            parse_event_line(r#"data: {"content":"Hi"}"#),
            Some(append("Hi"))
        );
    }

    #[test]
    fn test_parse_without_space_after_prefix() {
        assert_eq!(
            parse_event_line(r#"data:{"content":"Hi"}"#),
            Some(append("Hi"))
        );
    }

    #[test]
    fn test_parse_done_and_error() {
        assert_eq!(
            parse_event_line(r#"data: {"done":true}"#),
            Some(StreamEvent::Complete)
        );
        assert_eq!(
            parse_event_line(r#"data: {"error":"boom"}"#),
            Some(StreamEvent::Fail {
                message: "boom".into()
            })
        );
    }

    #[test]
    fn test_parse_error_wins_over_done() {
        assert_eq!(
            parse_event_line(r#"data: {"done":true,"error":"late failure"}"#),
            Some(StreamEvent::Fail {
                message: "late failure".into()
            })
        );
    }

    #[test]
    fn test_parse_ignores_other_lines() {
        assert_eq!(parse_event_line(""), None);
        assert_eq!(parse_event_line(": keep-alive"), None);
        assert_eq!(parse_event_line("event: message"), None);
        assert_eq!(parse_event_line(r#"data: {"done":false}"#), None);
        assert_eq!(parse_event_line(r#"data: {"other":1}"#), None);
    }

    #[test]
    fn test_parse_malformed_json_skipped() {
        assert_eq!(parse_event_line("data: {bad"), None);
        assert_eq!(parse_event_line("data: [DONE]"), None);
    }

    // --- EventDecoder ---

    #[test]
    fn test_malformed_line_does_not_abort() {
        let mut decoder = EventDecoder::new();
        let events = decoder.feed(b"data: {bad\ndata: {\"content\":\"hi\"}\n");
        assert_eq!(events, vec![append("hi")]);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_json_split_across_chunks_waits_for_terminator() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.feed(b"data: {\"content\":").is_empty());
        assert!(decoder.feed(b"\"Hel").is_empty());
        // Complete JSON but still no terminator
        assert!(decoder.feed(b"lo\"}").is_empty());
        assert_eq!(decoder.feed(b"\n\n"), vec![append("Hello")]);
    }

    #[test]
    fn test_multibyte_split_inside_payload() {
        let events = decode_chunks(&[
            b"data: {\"content\":\"na\xC3",
            b"\xAFve\"}\n\n",
            b"data: {\"done\":true}\n\n",
        ]);
        assert_eq!(events, vec![append("naïve"), StreamEvent::Complete]);
    }

    #[test]
    fn test_full_exchange() {
        let events = decode_chunks(&[
            b"data: {\"content\":\"Hi\"}\n\ndata: {\"content\":\" there\"}\n\n",
            b"data: {\"done\":true}\n\n",
        ]);
        assert_eq!(
            events,
            vec![append("Hi"), append(" there"), StreamEvent::Complete]
        );
    }

    #[test]
    fn test_truncated_stream_synthesizes_one_fail() {
        let events = decode_chunks(&[b"data: {\"content\":\"par\"}\n\n", b"data: {\"cont"]);
        assert_eq!(
            events,
            vec![
                append("par"),
                StreamEvent::Fail {
                    message: TRUNCATED_STREAM_MESSAGE.into()
                }
            ]
        );
    }

    #[test]
    fn test_unterminated_final_line_not_parsed() {
        // A valid payload without its newline must not count as completion
        let events = decode_chunks(&[b"data: {\"done\":true}"]);
        assert_eq!(
            events,
            vec![StreamEvent::Fail {
                message: TRUNCATED_STREAM_MESSAGE.into()
            }]
        );
    }

    #[test]
    fn test_empty_body_fails() {
        let events = decode_chunks(&[]);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Fail { .. }));
    }

    #[test]
    fn test_nothing_after_terminal() {
        let mut decoder = EventDecoder::new();
        let events = decoder.feed(
            b"data: {\"error\":\"boom\"}\n\ndata: {\"content\":\"late\"}\n\ndata: {\"done\":true}\n",
        );
        assert_eq!(
            events,
            vec![StreamEvent::Fail {
                message: "boom".into()
            }]
        );
        assert!(decoder.feed(b"data: {\"content\":\"later\"}\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_finish_after_complete_is_silent() {
        let mut decoder = EventDecoder::new();
        decoder.feed(b"data: {\"done\":true}\n\n");
        assert_eq!(decoder.finish(), None);
    }

    // --- consume ---

    fn body(chunks: Vec<Result<Vec<u8>, String>>) -> impl Stream<Item = Result<Vec<u8>, String>> {
        futures::stream::iter(chunks)
    }

    #[tokio::test]
    async fn test_consume_stops_after_done() {
        let chunks = vec![
            Ok(b"data: {\"content\":\"Hi\"}\n".to_vec()),
            Ok(b"data: {\"done\":true}\n".to_vec()),
            Ok(b"data: {\"content\":\"ignored\"}\n".to_vec()),
        ];
        let events: Vec<_> = consume(body(chunks), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events, vec![append("Hi"), StreamEvent::Complete]);
    }

    #[tokio::test]
    async fn test_consume_read_error_fails_once() {
        let chunks = vec![
            Ok(b"data: {\"content\":\"par\"}\n".to_vec()),
            Err("connection reset".to_string()),
            Ok(b"data: {\"done\":true}\n".to_vec()),
        ];
        let events: Vec<_> = consume(body(chunks), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                append("par"),
                StreamEvent::Fail {
                    message: "Stream read error: connection reset".into()
                }
            ]
        );
    }

    #[tokio::test]
    async fn test_consume_truncation() {
        let chunks = vec![Ok(b"data: {\"content\":\"par\"}\n".to_vec())];
        let events: Vec<_> = consume(body(chunks), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Fail { .. }));
    }

    #[tokio::test]
    async fn test_consume_cancelled_yields_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chunks = vec![Ok(b"data: {\"content\":\"Hi\"}\n".to_vec())];
        let events: Vec<_> = consume(body(chunks), cancel).collect().await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_consume_cancelled_while_waiting_for_body() {
        let first: Vec<Result<Vec<u8>, String>> =
            vec![Ok(b"data: {\"content\":\"Hi\"}\n".to_vec())];
        let stalled = futures::stream::iter(first).chain(futures::stream::pending());

        let cancel = CancellationToken::new();
        let mut events = consume(stalled, cancel.clone());
        assert_eq!(events.next().await, Some(append("Hi")));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let rest = tokio::time::timeout(std::time::Duration::from_secs(2), events.next())
            .await
            .expect("cancellation ends the stream");
        assert_eq!(rest, None);
    }
}
