pub mod multiplexer;
pub mod sse;

pub use sse::{sse_frame_stream, sse_raw_frame_stream, SseFrame, SseParser};

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}
