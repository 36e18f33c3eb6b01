pub mod driver;
pub mod normalizer;
pub mod sse;
pub mod usage;

pub use driver::{decode_stream, FrameDecoder};
pub use normalizer::{normalize_frames, ChatCompletionsNormalizer};
pub use sse::{sse_event_stream, SseParser};
pub use usage::UsageAccumulator;

use std::pin::Pin;

use futures_util::Stream;

use crate::error::GatewayError;
use crate::protocol::canonical::NormalizedEvent;

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Whether a stream decoder wants more frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Done,
}

/// Normalized events produced by an adapter, in emission order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<NormalizedEvent, GatewayError>> + Send>>;
