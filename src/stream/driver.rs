//! Drives a frame decoder over an upstream byte stream.

use futures_util::StreamExt;

use super::{sse_event_stream, ChatCompletionsNormalizer, EventStream, SseEvent, StreamControl};
use crate::error::GatewayError;
use crate::protocol::anthropic::stream::AnthropicStreamDecoder;
use crate::protocol::canonical::NormalizedEvent;
use crate::protocol::codex::stream::CodexStreamDecoder;
use crate::transport::{ByteStream, CallContext};

/// A stateful decoder turning SSE frames into normalized events.
pub trait FrameDecoder: Send + 'static {
    /// # Errors
    ///
    /// Fatal stream errors (explicit error frames, bad tool arguments).
    fn push(&mut self, event: &SseEvent, out: &mut Vec<NormalizedEvent>) -> Result<StreamControl, GatewayError>;

    /// Flush buffered state. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Same as [`FrameDecoder::push`].
    fn finish(&mut self, out: &mut Vec<NormalizedEvent>) -> Result<(), GatewayError>;
}

impl FrameDecoder for ChatCompletionsNormalizer {
    fn push(&mut self, event: &SseEvent, out: &mut Vec<NormalizedEvent>) -> Result<StreamControl, GatewayError> {
        self.push_data(&event.data, out)
    }

    fn finish(&mut self, out: &mut Vec<NormalizedEvent>) -> Result<(), GatewayError> {
        ChatCompletionsNormalizer::finish(self, out)
    }
}

impl FrameDecoder for AnthropicStreamDecoder {
    fn push(&mut self, event: &SseEvent, out: &mut Vec<NormalizedEvent>) -> Result<StreamControl, GatewayError> {
        self.push_data(&event.data, out)
    }

    fn finish(&mut self, out: &mut Vec<NormalizedEvent>) -> Result<(), GatewayError> {
        AnthropicStreamDecoder::finish(self, out)
    }
}

impl FrameDecoder for CodexStreamDecoder {
    fn push(&mut self, event: &SseEvent, out: &mut Vec<NormalizedEvent>) -> Result<StreamControl, GatewayError> {
        self.push_event(event, out)
    }

    fn finish(&mut self, out: &mut Vec<NormalizedEvent>) -> Result<(), GatewayError> {
        CodexStreamDecoder::finish(self, out);
        Ok(())
    }
}

/// Decode `bytes` with `decoder`, honouring the call's deadline and
/// cancellation between frames and before every emitted event.
///
/// Input exhaustion counts as a terminal condition, so buffered state is
/// flushed even when the upstream never sends an explicit end marker.
pub fn decode_stream<D: FrameDecoder>(ctx: CallContext, bytes: ByteStream, mut decoder: D) -> EventStream {
    let stream = async_stream::try_stream! {
        let mut frames = Box::pin(sse_event_stream(bytes));
        let mut out: Vec<NormalizedEvent> = Vec::with_capacity(8);
        loop {
            let Some(frame) = ctx.guard(frames.next()).await? else {
                break;
            };
            let control = decoder.push(&frame?, &mut out)?;
            for event in out.drain(..) {
                ctx.check()?;
                yield event;
            }
            if control == StreamControl::Done {
                break;
            }
        }
        decoder.finish(&mut out)?;
        for event in out.drain(..) {
            ctx.check()?;
            yield event;
        }
    };
    Box::pin(stream)
}
