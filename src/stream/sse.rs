//! Incremental SSE parsing for upstream response bodies, and the frame
//! encoders used by the HTTP surface.
//!
//! Field handling follows the
//! [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html):
//! `data:` lines accumulate, a blank line dispatches, `:` starts a comment.
use super::SseEvent;
use crate::error::GatewayError;
use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        self.events.extend(parsed.drain(..));
    }
}

/// Incremental SSE line parser.
///
/// Chunks may split lines, fields or frames at any byte; complete frames are
/// appended to the caller's buffer as soon as their blank line arrives.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            event_type: None,
            data_buffer: String::new(),
            has_data: false,
        }
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a trailing frame when the body ends without a final blank line.
    pub fn finish_into(&mut self, out: &mut Vec<SseEvent>) {
        if self.read_offset < self.buffer.len() {
            let tail = self.buffer[self.read_offset..].to_string();
            let line = tail.strip_suffix('\r').unwrap_or(&tail);
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
        }
        self.buffer.clear();
        self.read_offset = 0;
        Self::process_line(
            "",
            &mut self.event_type,
            &mut self.data_buffer,
            &mut self.has_data,
            out,
        );
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                });
                *has_data = false;
            } else {
                *event_type = None;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.trim().to_string());
        }
        // id:, retry: and unknown fields carry nothing the gateway uses.
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed bytes through the parser. Invalid sequences become U+FFFD; only an
/// incomplete trailing sequence is carried over to the next chunk.
fn feed_utf8(parser: &mut SseParser, remainder: &mut Vec<u8>, bytes: &[u8], out: &mut Vec<SseEvent>) {
    remainder.extend_from_slice(bytes);
    let mut offset = 0;
    while offset < remainder.len() {
        match std::str::from_utf8(&remainder[offset..]) {
            Ok(text) => {
                parser.feed_into(text, out);
                offset = remainder.len();
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if let Ok(text) = std::str::from_utf8(&remainder[offset..offset + valid_up_to]) {
                    parser.feed_into(text, out);
                }
                offset += valid_up_to;
                match e.error_len() {
                    Some(invalid) => {
                        parser.feed_into(char::REPLACEMENT_CHARACTER.encode_utf8(&mut [0; 4]), out);
                        offset += invalid;
                    }
                    None => break,
                }
            }
        }
    }
    remainder.drain(..offset);
}

/// Split an upstream byte stream into SSE events.
///
/// Transport errors are forwarded as-is and end the stream. A frame left
/// unterminated when the body ends is still delivered.
pub fn sse_event_stream<S>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, GatewayError>> + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            SseParser::new(),
            Vec::<u8>::new(),
            Vec::<SseEvent>::with_capacity(8),
            PendingEvents::new(),
            false,
        ),
        |(mut stream, mut parser, mut remainder, mut parsed, mut pending, mut finished)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((
                        Ok(event),
                        (stream, parser, remainder, parsed, pending, finished),
                    ));
                }
                if finished {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => feed_utf8(&mut parser, &mut remainder, &bytes, &mut parsed),
                    Some(Err(err)) => {
                        finished = true;
                        return Some((
                            Err(err),
                            (stream, parser, remainder, parsed, pending, finished),
                        ));
                    }
                    None => {
                        finished = true;
                        if !remainder.is_empty() {
                            let tail = String::from_utf8_lossy(&remainder).into_owned();
                            remainder.clear();
                            parser.feed_into(&tail, &mut parsed);
                        }
                        parser.finish_into(&mut parsed);
                    }
                }
                pending.extend_from_vec(&mut parsed);
            }
        },
    )
}

/// `data: {json}\n\n`
#[must_use]
pub fn data_frame(json: &str) -> String {
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// `event: {name}\ndata: {json}\n\n`
#[must_use]
pub fn named_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

pub const DONE_FRAME: &str = "data: [DONE]\n\n";
